//! In-memory indices
//!
//! Rebuilt from the regions on load, maintained incrementally otherwise.
//!
//! # Design
//! - Content: 256 buckets keyed by the first hash byte
//! - References: append-ordered array plus a path-hash map of positions
//! - Views and branches: maps keyed by id (the view forest is just
//!   parent-id back-pointers)
//! - Ancestry: the current view's chain of ancestors, capped at
//!   [`MAX_ANCESTRY`] entries

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::access::Permissions;
use super::hash::ContentHash;
use super::types::{BranchId, FileType, ViewId};

/// Number of content hash buckets.
pub const HASH_BUCKETS: usize = 256;

/// Maximum length of an ancestry chain.
pub const MAX_ANCESTRY: usize = 256;

/// Location of a stored content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentEntry {
    pub hash: ContentHash,
    /// Logical offset of the payload (just past the header).
    pub offset: u64,
    /// Length as read back.
    pub size: u64,
    /// Payload bytes in the region; less than `size` when compressed.
    pub stored: u64,
    pub compressed: bool,
}

/// Hash table of content blocks.
pub struct ContentIndex {
    buckets: Vec<Vec<ContentEntry>>,
    count: usize,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self {
            buckets: (0..HASH_BUCKETS).map(|_| Vec::new()).collect(),
            count: 0,
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&ContentEntry> {
        self.buckets[hash.bucket()].iter().find(|e| e.hash == *hash)
    }

    /// Insert unless the hash is already present. Returns true if inserted.
    pub fn insert(&mut self, entry: ContentEntry) -> bool {
        if self.get(&entry.hash).is_some() {
            return false;
        }
        self.buckets[entry.hash.bucket()].push(entry);
        self.count += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for ContentIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// One reference, as indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub path: String,
    pub path_hash: ContentHash,
    pub content: ContentHash,
    pub view: ViewId,
    pub created: u64,
    pub hidden: bool,
    pub file_type: FileType,
    pub permissions: Permissions,
    pub owner: u16,
}

/// All references in append order.
#[derive(Default)]
pub struct RefIndex {
    entries: Vec<RefEntry>,
    by_path: BTreeMap<ContentHash, Vec<usize>>,
}

impl RefIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: RefEntry) -> usize {
        let idx = self.entries.len();
        self.by_path.entry(entry.path_hash).or_default().push(idx);
        self.entries.push(entry);
        idx
    }

    pub fn get(&self, idx: usize) -> &RefEntry {
        &self.entries[idx]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RefEntry> {
        self.entries.iter()
    }

    /// Newest reference to `path` visible from `ancestry`, hidden or not.
    ///
    /// Newest means the highest view id in the ancestry (a child is always
    /// younger than its parent), then the latest append within that view.
    /// Both hash and path must match so hash collisions cannot alias.
    pub fn best(&self, path: &str, path_hash: &ContentHash, ancestry: &Ancestry) -> Option<&RefEntry> {
        self.by_path
            .get(path_hash)?
            .iter()
            .map(|&i| &self.entries[i])
            .filter(|e| e.path == path && ancestry.contains(e.view))
            .max_by_key(|e| e.view)
    }

    /// Distinct paths with at least one reference in `ancestry`.
    pub fn paths_in<'a>(&'a self, ancestry: &'a Ancestry) -> impl Iterator<Item = &'a str> + 'a {
        let mut seen = BTreeMap::new();
        self.entries
            .iter()
            .filter(move |e| ancestry.contains(e.view))
            .filter_map(move |e| seen.insert(e.path.as_str(), ()).is_none().then_some(e.path.as_str()))
    }
}

/// A view, as indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    pub id: ViewId,
    pub parent: ViewId,
    pub branch: BranchId,
    pub created: u64,
    pub label: String,
}

/// A branch, as indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEntry {
    pub id: BranchId,
    pub name: String,
    pub base: ViewId,
    pub head: ViewId,
    pub created: u64,
}

/// Chain of view ids from a view up to its root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ancestry {
    ids: Vec<ViewId>,
}

impl Ancestry {
    /// Walk parent links from `start`.
    ///
    /// Stops at a view that is its own parent, a parent that does not
    /// exist, or after [`MAX_ANCESTRY`] entries.
    pub fn build(views: &BTreeMap<ViewId, ViewEntry>, start: ViewId) -> Self {
        let mut ids = Vec::new();
        let mut walk = start;
        while let Some(view) = views.get(&walk) {
            ids.push(walk);
            if view.parent == walk || ids.len() >= MAX_ANCESTRY {
                break;
            }
            walk = view.parent;
        }
        Self { ids }
    }

    #[inline]
    pub fn contains(&self, view: ViewId) -> bool {
        self.ids.contains(&view)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids from the start view towards the root.
    pub fn iter(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.ids.iter().copied()
    }

    /// Deepest view present in both chains.
    pub fn common_ancestor(&self, other: &Ancestry) -> Option<ViewId> {
        self.iter().find(|&v| other.contains(v))
    }
}
