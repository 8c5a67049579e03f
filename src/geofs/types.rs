//! Identifiers and value types shared across GeoFS

use alloc::string::String;
use core::fmt;

use super::access::Permissions;
use super::hash::ContentHash;

/// Identifier of a view (a snapshot in the view forest).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(transparent)]
pub struct ViewId(pub u64);

impl ViewId {
    /// Root view of the main branch.
    pub const GENESIS: Self = Self(0);
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a branch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(transparent)]
pub struct BranchId(pub u64);

impl BranchId {
    /// The initial branch.
    pub const MAIN: Self = Self(0);
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a reference names.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FileType {
    File = 0,
    Directory = 1,
    Symlink = 2,
}

impl FileType {
    /// Decode the on-disk tag.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(FileType::File),
            1 => Some(FileType::Directory),
            2 => Some(FileType::Symlink),
            _ => None,
        }
    }

    /// One-letter tag used in listings.
    pub const fn tag(self) -> char {
        match self {
            FileType::File => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
        }
    }
}

/// Which quota a limit or usage query refers to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum QuotaTarget {
    /// The whole volume.
    Volume,
    /// One branch.
    Branch(BranchId),
}

impl QuotaTarget {
    /// On-disk sentinel for the volume-wide quota.
    pub const VOLUME_SENTINEL: u64 = u64::MAX;

    pub const fn to_raw(self) -> u64 {
        match self {
            QuotaTarget::Volume => Self::VOLUME_SENTINEL,
            QuotaTarget::Branch(id) => id.0,
        }
    }

    pub const fn from_raw(raw: u64) -> Self {
        if raw == Self::VOLUME_SENTINEL {
            QuotaTarget::Volume
        } else {
            QuotaTarget::Branch(BranchId(raw))
        }
    }
}

/// Quota limits. Zero means unlimited.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Quota {
    pub max_content_bytes: u64,
    pub max_refs: u64,
    pub max_views: u64,
}

impl Quota {
    /// No limits at all.
    pub const UNLIMITED: Self = Self {
        max_content_bytes: 0,
        max_refs: 0,
        max_views: 0,
    };

    /// Would `usage` plus `extra` break any non-zero limit?
    pub fn exceeded_by(&self, usage: &Usage, extra: &Usage) -> bool {
        let over = |limit: u64, used: u64, add: u64| limit != 0 && add != 0 && used + add > limit;
        over(self.max_content_bytes, usage.content_bytes, extra.content_bytes)
            || over(self.max_refs, usage.refs, extra.refs)
            || over(self.max_views, usage.views, extra.views)
    }
}

/// Accumulated resource usage.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Usage {
    pub content_bytes: u64,
    pub refs: u64,
    pub views: u64,
}

/// Running volume statistics.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct VolumeStats {
    /// Header plus stored payload bytes of every distinct content block.
    pub total_content_bytes: u64,
    /// Bytes saved by compression.
    pub compressed_bytes: u64,
    /// Blocks stored compressed.
    pub compressed_count: u64,
    pub total_refs: u64,
    pub total_views: u64,
    pub total_branches: u64,
    pub dedup_hits: u64,
    pub total_lookups: u64,
    pub content_used: u64,
    pub ref_used: u64,
    pub view_used: u64,
}

/// Region sizes in pages for a new volume.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VolumeConfig {
    pub content_pages: usize,
    pub ref_pages: usize,
    pub view_pages: usize,
}

impl VolumeConfig {
    pub const DEFAULT_CONTENT_PAGES: usize = 256;
    pub const DEFAULT_REF_PAGES: usize = 64;
    pub const DEFAULT_VIEW_PAGES: usize = 32;

    /// Explicit sizes; zero picks the default for that region.
    pub const fn new(content_pages: usize, ref_pages: usize, view_pages: usize) -> Self {
        Self {
            content_pages: if content_pages == 0 { Self::DEFAULT_CONTENT_PAGES } else { content_pages },
            ref_pages: if ref_pages == 0 { Self::DEFAULT_REF_PAGES } else { ref_pages },
            view_pages: if view_pages == 0 { Self::DEFAULT_VIEW_PAGES } else { view_pages },
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// One visible child of a directory.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DirEntry {
    /// Final component.
    pub name: String,
    /// Full path.
    pub path: String,
    pub file_type: FileType,
    /// Payload size of the referenced content (0 for implied directories).
    pub size: u64,
}

impl DirEntry {
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Metadata of a visible path.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileStat {
    pub size: u64,
    pub file_type: FileType,
    pub permissions: Permissions,
    pub owner: u16,
    pub created: u64,
    pub view: ViewId,
    pub content: ContentHash,
    /// Visible paths sharing the same content.
    pub links: u32,
}

impl FileStat {
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// How a path differs between two snapshots.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChangeKind {
    /// Absent in the first, visible in the second.
    Added,
    /// Visible in both with different content or type.
    Modified,
    /// Visible in the first, hidden or absent in the second.
    Hidden,
}

/// One difference reported by `view_diff` or `branch_diff`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DiffEntry {
    pub path: String,
    pub kind: ChangeKind,
    /// Content on the newer side (zero when hidden).
    pub content: ContentHash,
}

/// A view as listed by `view_list`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ViewInfo {
    pub id: ViewId,
    pub parent: ViewId,
    pub branch: BranchId,
    pub created: u64,
    pub label: String,
}

/// A branch as listed by `branch_list`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BranchInfo {
    pub id: BranchId,
    pub name: String,
    pub base: ViewId,
    pub head: ViewId,
    pub created: u64,
}

/// A path changed differently on both sides of a merge.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MergeConflict {
    pub path: String,
    /// Content on the current branch (zero if hidden there).
    pub ours: ContentHash,
    /// Content on the source branch (zero if hidden there).
    pub theirs: ContentHash,
}

/// Outcome of a merge.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MergeReport {
    /// The merge view, now head of the current branch.
    pub view: ViewId,
    /// Source-side changes applied.
    pub applied: usize,
    /// Paths left as they were on the current branch.
    pub conflicts: alloc::vec::Vec<MergeConflict>,
}

impl MergeReport {
    #[inline]
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// One matching line reported by `file_grep`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GrepMatch<'a> {
    pub path: &'a str,
    /// 1-based.
    pub line_number: usize,
    pub line: &'a str,
}

/// Constraints for `file_find_filtered`. `None` fields match anything.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct FindFilter {
    /// Inclusive lower bound on the size.
    pub min_size: Option<u64>,
    /// Inclusive upper bound on the size.
    pub max_size: Option<u64>,
    pub file_type: Option<FileType>,
    pub owner: Option<u16>,
}

impl FindFilter {
    /// Whether an entry with these attributes passes.
    pub fn matches(&self, size: u64, file_type: FileType, owner: u16) -> bool {
        self.min_size.map_or(true, |min| size >= min)
            && self.max_size.map_or(true, |max| size <= max)
            && self.file_type.map_or(true, |t| t == file_type)
            && self.owner.map_or(true, |o| o == owner)
    }
}

/// One path reported by `file_find_filtered`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FindMatch<'a> {
    pub path: &'a str,
    /// Content size; 0 for directories.
    pub size: u64,
    pub file_type: FileType,
}
