//! Content fingerprints
//!
//! GeoFS identifies content and paths by their SHA-256 digest.

use core::fmt;
use sha2::{Digest, Sha256};

/// Size of a hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte SHA-256 fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// All-zero hash carried by hidden references.
    pub const ZERO: Self = Self([0; HASH_SIZE]);

    /// Hash of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Wrap raw digest bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Index bucket: the first digest byte.
    #[inline]
    pub const fn bucket(&self) -> usize {
        self.0[0] as usize
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_SIZE]
    }

    /// Short form for listings: the first 8 bytes in hex.
    pub fn short(&self) -> ShortHash<'_> {
        ShortHash(self)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Display adapter printing a hash prefix.
pub struct ShortHash<'a>(&'a ContentHash);

impl fmt::Display for ShortHash<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 .0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental hashing over several slices.
///
/// Used for the persisted checksum, which covers all three regions.
pub struct HashBuilder(Sha256);

impl HashBuilder {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}
