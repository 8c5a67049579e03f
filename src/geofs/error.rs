//! GeoFS error type

use core::fmt;

use crate::platform::IoError;

/// Everything a GeoFS operation can fail with.
///
/// Merge conflicts are not errors: a merge succeeds and reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoError {
    /// Block device failure during save, load, export or import.
    Io,
    /// No page or heap memory for a region segment or index node.
    OutOfMemory,
    /// Hash, path, view or branch not present.
    NotFound,
    /// Path or branch name already taken.
    AlreadyExists,
    /// Malformed path or name, unknown view id, bad parameter.
    InvalidArgument,
    /// The target device cannot hold the volume.
    VolumeFull,
    /// Stored data failed validation.
    Corrupt,
    /// Persisted image uses an unknown format version.
    UnsupportedVersion,
    /// Operation needs a file but the path is a directory.
    IsADirectory,
    /// Operation needs a directory but the path is not one.
    NotADirectory,
    /// The access context lacks the required permission.
    PermissionDenied,
    /// The operation would exceed a quota limit.
    QuotaExceeded,
    /// Too many symbolic links while resolving a path.
    SymlinkLoop,
}

impl GeoError {
    /// Kernel ABI error number.
    pub const fn code(self) -> i32 {
        match self {
            GeoError::Io => -1,
            GeoError::OutOfMemory => -2,
            GeoError::NotFound => -3,
            GeoError::AlreadyExists => -4,
            GeoError::InvalidArgument => -5,
            GeoError::VolumeFull => -6,
            GeoError::Corrupt | GeoError::UnsupportedVersion => -7,
            GeoError::IsADirectory => -8,
            GeoError::NotADirectory => -9,
            GeoError::PermissionDenied => -10,
            GeoError::QuotaExceeded => -11,
            GeoError::SymlinkLoop => -13,
        }
    }
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            GeoError::Io => "I/O error",
            GeoError::OutOfMemory => "Out of memory",
            GeoError::NotFound => "Not found",
            GeoError::AlreadyExists => "Already exists",
            GeoError::InvalidArgument => "Invalid argument",
            GeoError::VolumeFull => "Volume full",
            GeoError::Corrupt => "Data corruption",
            GeoError::UnsupportedVersion => "Unsupported format version",
            GeoError::IsADirectory => "Is a directory",
            GeoError::NotADirectory => "Not a directory",
            GeoError::PermissionDenied => "Permission denied",
            GeoError::QuotaExceeded => "Quota exceeded",
            GeoError::SymlinkLoop => "Symlink loop detected",
        };
        f.write_str(msg)
    }
}

impl From<IoError> for GeoError {
    fn from(_: IoError) -> Self {
        GeoError::Io
    }
}

/// Result alias for GeoFS operations.
pub type GeoResult<T> = Result<T, GeoError>;
