//! GeoFS: the geological filesystem
//!
//! Files are never modified in place. Content is stored once per distinct
//! hash in an append-only region; paths become visible through reference
//! records tagged with the view they were written in. Views form a forest
//! of snapshots, so older views keep seeing older strata. Branches name
//! lineages through the forest and can be merged.
//!
//! # Design
//! - Three append-only RAM regions: content, references, views (the view
//!   region also carries branch and quota records)
//! - Larger content blocks are stored LZ4-compressed when that pays off
//! - In-memory indices rebuilt from the regions on load
//! - Resolution walks the current view's ancestry; the newest reference
//!   wins and a hidden one masks everything older
//! - Every mutation checks permissions and quota, then reserves its full
//!   footprint before touching any state
//!
//! # Properties
//! - Region used-byte counts never decrease
//! - Identical data is stored once
//! - `load(save(v))` answers every query like `v`

mod access;
mod branch;
mod compress;
mod error;
mod files;
mod hash;
mod index;
mod path;
mod persist;
mod quota;
mod record;
mod region;
mod types;
mod views;
mod volume;

#[cfg(test)]
mod tests;

pub use access::{AccessContext, Capabilities, Permissions, ROOT_UID};
pub use compress::COMPRESS_MIN_SIZE;
pub use error::{GeoError, GeoResult};
pub use files::GREP_MAX_FILE;
pub use hash::{ContentHash, HashBuilder, HASH_SIZE};
pub use index::{HASH_BUCKETS, MAX_ANCESTRY};
pub use path::{MAX_NAME, MAX_PATH};
pub use persist::{Superblock, MAX_REGION_BYTES, PERSIST_MAGIC, PERSIST_VERSION};
pub use record::{CONTENT_HEADER_SIZE, LABEL_SIZE, REF_RECORD_SIZE};
pub use region::MIN_GROWTH_PAGES;
pub use types::{
    BranchId, BranchInfo, ChangeKind, DiffEntry, DirEntry, FileStat, FileType, FindFilter, FindMatch, GrepMatch,
    MergeConflict, MergeReport, Quota, QuotaTarget, Usage, ViewId, ViewInfo, VolumeConfig, VolumeStats,
};
pub use volume::{Volume, AUTO_LABEL, DIR_MARKER, GENESIS_LABEL, MAIN_BRANCH_NAME, SYMLINK_MAX_HOPS};
