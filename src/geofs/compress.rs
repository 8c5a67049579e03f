//! Content compression
//!
//! Payloads of at least [`COMPRESS_MIN_SIZE`] bytes are stored as LZ4
//! blocks when that saves more than a tenth of their size. The header of a
//! compressed block carries the stored length in `size` and the original
//! length next to it; the content index always reports the original.

use alloc::borrow::Cow;
use alloc::vec::Vec;

use super::error::{GeoError, GeoResult};
use super::record::CONTENT_HEADER_SIZE;

/// Smaller payloads are always stored as they are.
pub const COMPRESS_MIN_SIZE: usize = 64;

/// Upper bound on how much one LZ4 block can expand.
const MAX_EXPANSION: u64 = 255;

/// A payload in the form it will be written to the content region.
pub(super) struct Packed<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub compressed: bool,
}

impl<'a> Packed<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        if data.len() >= COMPRESS_MIN_SIZE {
            let out = lz4_flex::block::compress(data);
            if out.len() < data.len() * 9 / 10 {
                return Self {
                    bytes: Cow::Owned(out),
                    compressed: true,
                };
            }
        }
        Self {
            bytes: Cow::Borrowed(data),
            compressed: false,
        }
    }

    /// Region bytes taken, header included.
    pub fn footprint(&self) -> usize {
        CONTENT_HEADER_SIZE + self.bytes.len()
    }
}

/// Whether `stored` LZ4 bytes could plausibly expand to `original` bytes.
pub(super) fn plausible(stored: u64, original: u64) -> bool {
    original >= stored && original <= stored.saturating_mul(MAX_EXPANSION)
}

/// Expand a stored LZ4 block that must decode to exactly `original` bytes.
///
/// # Errors
/// * `Corrupt` - Malformed block or a length mismatch
pub(super) fn unpack(stored: &[u8], original: u64) -> GeoResult<Vec<u8>> {
    if !plausible(stored.len() as u64, original) {
        return Err(GeoError::Corrupt);
    }
    let size = usize::try_from(original).map_err(|_| GeoError::Corrupt)?;
    let out = lz4_flex::block::decompress(stored, size).map_err(|e| {
        log::error!("content: bad LZ4 block: {}", e);
        GeoError::Corrupt
    })?;
    if out.len() != size {
        return Err(GeoError::Corrupt);
    }
    Ok(out)
}
