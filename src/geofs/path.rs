//! Path validation and manipulation
//!
//! Every path entering GeoFS is checked here before it touches an index.
//!
//! # Rules
//! - Absolute: starts with `/`
//! - At most [`MAX_PATH`] - 1 bytes (the on-disk field is NUL-terminated)
//! - No NUL bytes, no empty, `.` or `..` components, no trailing slash
//! - Each component at most [`MAX_NAME`] - 1 bytes
//!
//! The root `/` is a valid directory but never names a reference.

use super::error::{GeoError, GeoResult};
use super::hash::ContentHash;

/// Size of the inlined path field of a reference record.
pub const MAX_PATH: usize = 512;

/// Maximum size of one path component (including terminator).
pub const MAX_NAME: usize = 128;

/// Root directory.
pub const ROOT: &str = "/";

/// Validate a path that names a reference.
///
/// # Returns
/// * `Ok(path)` - The same path, known to be well-formed
/// * `Err(GeoError::InvalidArgument)` - Validation failed
pub fn validate(path: &str) -> GeoResult<&str> {
    if path == ROOT {
        return Err(GeoError::InvalidArgument);
    }
    validate_dir(path)
}

/// Validate a directory argument; the root is allowed.
pub fn validate_dir(path: &str) -> GeoResult<&str> {
    if path.is_empty() || !path.starts_with('/') || path.len() >= MAX_PATH {
        return Err(GeoError::InvalidArgument);
    }
    if path.bytes().any(|b| b == 0) {
        return Err(GeoError::InvalidArgument);
    }
    if path == ROOT {
        return Ok(path);
    }

    for component in path[1..].split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(GeoError::InvalidArgument);
        }
        if component.len() >= MAX_NAME {
            return Err(GeoError::InvalidArgument);
        }
    }

    Ok(path)
}

/// Hash used to index a path.
#[inline]
pub fn path_hash(path: &str) -> ContentHash {
    ContentHash::of(path.as_bytes())
}

/// Parent directory of a validated path.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(i) => &path[..i],
    }
}

/// Final component of a validated path.
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Path of `path` relative to `dir`, if it lies strictly below it.
///
/// `below("/a", "/a/b/c")` is `Some("b/c")`; `below("/a", "/ab")` is `None`.
pub fn below<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let rest = if dir == ROOT {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(dir)?.strip_prefix('/')?
    };
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Number of components in a relative path.
#[inline]
pub fn depth(relative: &str) -> usize {
    relative.split('/').count()
}

/// Join a directory and a child name.
pub fn join(dir: &str, child: &str) -> alloc::string::String {
    let mut out = alloc::string::String::with_capacity(dir.len() + child.len() + 1);
    out.push_str(dir);
    if dir != ROOT {
        out.push('/');
    }
    out.push_str(child);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    #[test]
    fn test_valid_paths() {
        assert!(validate("/hello.txt").is_ok());
        assert!(validate("/a/b/c").is_ok());
        assert!(validate_dir("/").is_ok());
    }

    #[test]
    fn test_invalid_paths() {
        for bad in ["", "relative", "/", "/a/", "//a", "/a/./b", "/a/../b", "/a\0b"] {
            assert_eq!(validate(bad), Err(GeoError::InvalidArgument), "{:?}", bad);
        }
    }

    #[test]
    fn test_length_limits() {
        let mut long = String::from("/");
        long.push_str(&"x".repeat(MAX_NAME - 1));
        assert!(validate(&long).is_ok());
        long.push('x');
        assert_eq!(validate(&long), Err(GeoError::InvalidArgument));

        let mut deep = String::new();
        while deep.len() < MAX_PATH {
            deep.push_str("/abcdefg");
        }
        assert_eq!(validate(&deep), Err(GeoError::InvalidArgument));
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/a/b/c"), "/a/b");
        assert_eq!(name("/a/b/c"), "c");
        assert_eq!(join("/", "x"), "/x");
        assert_eq!(join("/a", "x"), "/a/x");
    }

    #[test]
    fn test_below() {
        assert_eq!(below("/", "/a/b"), Some("a/b"));
        assert_eq!(below("/a", "/a/b/c"), Some("b/c"));
        assert_eq!(below("/a", "/ab"), None);
        assert_eq!(below("/a", "/a"), None);
        assert_eq!(depth("b/c"), 2);
    }
}
