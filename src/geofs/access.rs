//! Access Control
//!
//! Identity and permission checks for GeoFS operations.
//!
//! # Model
//! - Every operation runs under the volume's current [`AccessContext`]
//! - uid 0, or the KERNEL / FS_ADMIN capability, bypasses all checks
//! - Otherwise the context must own the reference AND the reference's
//!   permission mask must contain the required bit
//!
//! # Properties
//! - Deny by default: a context that is neither owner nor privileged
//!   never passes
//! - New references are owned by the creating context

use bitflags::bitflags;

use super::error::{GeoError, GeoResult};

bitflags! {
    /// Permission bits stored with every reference.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        /// Read content.
        const READ = 1 << 0;
        /// Write, append, rename, hide.
        const WRITE = 1 << 1;
        /// Execute.
        const EXEC = 1 << 2;
    }
}

impl Permissions {
    /// Mask given to newly created references.
    pub const DEFAULT: Self = Self::READ.union(Self::WRITE);
}

bitflags! {
    /// Capability mask of an access context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Filesystem administration: bypasses permissions, sets quotas.
        const FS_ADMIN = 0x0000_0200;
        /// Kernel-internal caller: bypasses everything.
        const KERNEL = 0x8000_0000;
    }
}

/// Root user id.
pub const ROOT_UID: u16 = 0;

/// Identity used for permission and quota checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessContext {
    pub uid: u16,
    pub gid: u16,
    pub caps: Capabilities,
}

impl AccessContext {
    /// The kernel itself: uid 0 with the KERNEL capability.
    pub const fn kernel() -> Self {
        Self {
            uid: ROOT_UID,
            gid: 0,
            caps: Capabilities::KERNEL,
        }
    }

    /// An unprivileged user.
    pub const fn user(uid: u16, gid: u16) -> Self {
        Self {
            uid,
            gid,
            caps: Capabilities::empty(),
        }
    }

    /// Same identity with additional capabilities.
    pub const fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = self.caps.union(caps);
        self
    }

    /// Root or administrative capability.
    #[inline]
    pub fn is_privileged(&self) -> bool {
        self.uid == ROOT_UID || self.caps.intersects(Capabilities::KERNEL | Capabilities::FS_ADMIN)
    }

    /// Root bypasses quotas; capabilities do not.
    #[inline]
    pub fn bypasses_quota(&self) -> bool {
        self.uid == ROOT_UID || self.caps.contains(Capabilities::KERNEL)
    }

    /// Check access to a reference owned by `owner` with mask `mask`.
    ///
    /// # Returns
    /// * `Ok(())` - Privileged, or owner with every bit of `need` set
    /// * `Err(GeoError::PermissionDenied)` - Otherwise
    pub fn check(&self, owner: u16, mask: Permissions, need: Permissions) -> GeoResult<()> {
        if self.is_privileged() {
            return Ok(());
        }
        if owner == self.uid && mask.contains(need) {
            return Ok(());
        }
        Err(GeoError::PermissionDenied)
    }

    /// Require a privileged context.
    pub fn require_privileged(&self) -> GeoResult<()> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(GeoError::PermissionDenied)
        }
    }
}

impl Default for AccessContext {
    fn default() -> Self {
        Self::kernel()
    }
}
