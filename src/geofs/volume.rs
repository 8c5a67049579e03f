//! GeoFS Volume
//!
//! The volume owns three append-only regions and every index built over
//! them. This file holds the volume itself, the write pipeline shared by
//! all mutating operations, content addressing and reference resolution.
//! File, view, branch, quota and persistence operations live in sibling
//! modules as further `impl` blocks.
//!
//! # Write pipeline
//! Every mutation runs the same steps, in order:
//! 1. Validate arguments and check permissions
//! 2. Work out what will be appended (new content, refs, views)
//! 3. Check the effective quota against that footprint
//! 4. Reserve region space for the whole footprint
//! 5. Append records and update indices
//!
//! Steps 1-4 mutate nothing visible, so a failure leaves the volume as it
//! was. Step 5 cannot fail once the space is reserved.
//!
//! # Writable views
//! A reference is only ever appended to a view that belongs to the current
//! branch and is not the fork point of another branch. When the current
//! view does not qualify, an `Auto` child view is created on the current
//! branch first and becomes both the branch head and the current view.

use alloc::borrow::Cow;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use core::cell::Cell;

use crate::mm::PageAllocator;
use crate::platform::ticks;

use super::access::{AccessContext, Permissions};
use super::compress::{self, Packed};
use super::error::{GeoError, GeoResult};
use super::hash::ContentHash;
use super::index::{Ancestry, BranchEntry, ContentEntry, ContentIndex, RefEntry, RefIndex, ViewEntry};
use super::path;
use super::record::{
    self, BranchRecord, ContentHeader, RefRecord, ViewRecord, BRANCH_RECORD_SIZE, CONTENT_FLAG_COMPRESSED,
    CONTENT_HEADER_SIZE, LABEL_SIZE, REF_RECORD_SIZE, VIEW_V2_SIZE,
};
use super::region::Region;
use super::types::{BranchId, FileType, Quota, QuotaTarget, Usage, ViewId, VolumeConfig, VolumeStats};

/// Content of directory references.
pub const DIR_MARKER: &[u8] = b"__PHANTOM_DIR__";

/// Maximum symbolic links followed while resolving one path.
pub const SYMLINK_MAX_HOPS: usize = 8;

/// Label of the root view.
pub const GENESIS_LABEL: &str = "Genesis";

/// Name of the initial branch.
pub const MAIN_BRANCH_NAME: &str = "main";

/// Label of views created by the implicit commit rule.
pub const AUTO_LABEL: &str = "Auto";

/// View-region bytes appended when a view is created (view + head update).
pub(super) const VIEW_COMMIT_SIZE: usize = VIEW_V2_SIZE + BRANCH_RECORD_SIZE;

/// Region space one operation appends.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Footprint {
    pub content: usize,
    pub refs: usize,
    pub views: usize,
}

/// A reference about to be appended.
#[derive(Debug, Clone)]
pub(super) struct NewRef {
    pub path: String,
    pub content: ContentHash,
    pub hidden: bool,
    pub file_type: FileType,
    pub permissions: Permissions,
    pub owner: u16,
}

impl NewRef {
    /// Same metadata as `entry` at a (possibly different) path.
    pub fn like(entry: &RefEntry, path: &str) -> Self {
        Self {
            path: path.to_string(),
            content: entry.content,
            hidden: false,
            file_type: entry.file_type,
            permissions: entry.permissions,
            owner: entry.owner,
        }
    }

    /// Hidden marker masking `entry`.
    pub fn hiding(entry: &RefEntry) -> Self {
        Self {
            content: ContentHash::ZERO,
            hidden: true,
            ..Self::like(entry, &entry.path)
        }
    }
}

/// A GeoFS volume.
///
/// Owns its page allocator; every region segment is handed back to it
/// when the volume is dropped.
pub struct Volume<A: PageAllocator> {
    pub(super) pages: A,

    pub(super) content_region: Region,
    pub(super) ref_region: Region,
    pub(super) view_region: Region,

    pub(super) content: ContentIndex,
    pub(super) refs: RefIndex,
    pub(super) views: BTreeMap<ViewId, ViewEntry>,
    pub(super) branches: BTreeMap<BranchId, BranchEntry>,
    pub(super) quotas: BTreeMap<QuotaTarget, Quota>,
    /// Refs and views attributed to each branch.
    pub(super) usage: BTreeMap<BranchId, Usage>,

    pub(super) current_view: ViewId,
    pub(super) current_branch: BranchId,
    pub(super) ancestry: Ancestry,
    pub(super) ctx: AccessContext,

    pub(super) next_view: u64,
    pub(super) next_branch: u64,
    pub(super) created: u64,

    pub(super) total_content_bytes: u64,
    pub(super) compressed_bytes: u64,
    pub(super) compressed_count: u64,
    pub(super) total_refs: u64,
    pub(super) total_views: u64,
    pub(super) dedup_hits: u64,
    pub(super) lookups: Cell<u64>,
}

impl<A: PageAllocator> Volume<A> {
    /// Allocate the regions of an empty volume.
    ///
    /// Nothing is installed yet; used by `create` and by `load`.
    pub(super) fn empty(mut pages: A, config: VolumeConfig) -> GeoResult<Self> {
        let mut content_region = Region::new(&mut pages, config.content_pages)?;
        let mut ref_region = match Region::new(&mut pages, config.ref_pages) {
            Ok(r) => r,
            Err(e) => {
                content_region.release(&mut pages);
                return Err(e);
            }
        };
        let view_region = match Region::new(&mut pages, config.view_pages) {
            Ok(r) => r,
            Err(e) => {
                content_region.release(&mut pages);
                ref_region.release(&mut pages);
                return Err(e);
            }
        };

        Ok(Self {
            pages,
            content_region,
            ref_region,
            view_region,
            content: ContentIndex::new(),
            refs: RefIndex::new(),
            views: BTreeMap::new(),
            branches: BTreeMap::new(),
            quotas: BTreeMap::new(),
            usage: BTreeMap::new(),
            current_view: ViewId::GENESIS,
            current_branch: BranchId::MAIN,
            ancestry: Ancestry::default(),
            ctx: AccessContext::kernel(),
            next_view: 0,
            next_branch: 0,
            created: ticks(),
            total_content_bytes: 0,
            compressed_bytes: 0,
            compressed_count: 0,
            total_refs: 0,
            total_views: 0,
            dedup_hits: 0,
            lookups: Cell::new(0),
        })
    }

    /// Create a volume with the main branch and its Genesis view installed.
    ///
    /// # Errors
    /// * `OutOfMemory` - The page allocator cannot supply the regions
    pub fn create(pages: A, config: VolumeConfig) -> GeoResult<Self> {
        let mut vol = Self::empty(pages, config)?;

        vol.branches.insert(
            BranchId::MAIN,
            BranchEntry {
                id: BranchId::MAIN,
                name: MAIN_BRANCH_NAME.to_string(),
                base: ViewId::GENESIS,
                head: ViewId::GENESIS,
                created: vol.created,
            },
        );
        vol.next_branch = 1;
        vol.append_branch_record(BranchId::MAIN)?;

        // Genesis is its own parent: the root of the forest.
        vol.push_view(ViewId::GENESIS, BranchId::MAIN, GENESIS_LABEL)?;
        vol.rebuild_ancestry();

        log::info!(
            "volume created: content {} KiB, refs {} KiB, views {} KiB",
            vol.content_region.capacity() / 1024,
            vol.ref_region.capacity() / 1024,
            vol.view_region.capacity() / 1024
        );
        Ok(vol)
    }

    /// Snapshot of the running statistics.
    pub fn stats(&self) -> VolumeStats {
        VolumeStats {
            total_content_bytes: self.total_content_bytes,
            compressed_bytes: self.compressed_bytes,
            compressed_count: self.compressed_count,
            total_refs: self.total_refs,
            total_views: self.total_views,
            total_branches: self.branches.len() as u64,
            dedup_hits: self.dedup_hits,
            total_lookups: self.lookups.get(),
            content_used: self.content_region.used(),
            ref_used: self.ref_region.used(),
            view_used: self.view_region.used(),
        }
    }

    /// Replace the identity used by later permission and quota checks.
    pub fn set_context(&mut self, ctx: AccessContext) {
        self.ctx = ctx;
    }

    /// Current identity.
    pub fn context(&self) -> AccessContext {
        self.ctx
    }

    /// Access the page allocator (for diagnostics).
    pub fn pages(&self) -> &A {
        &self.pages
    }

    // ------------------------------------------------------------------
    // Content addressing
    // ------------------------------------------------------------------

    /// Store `data`, returning its hash.
    ///
    /// Data already present is not stored again; the dedup counter grows.
    /// Quota and region space are charged for the stored form, which may
    /// be compressed.
    ///
    /// # Errors
    /// * `QuotaExceeded` - The new block would break the effective quota
    /// * `OutOfMemory` - The content region cannot grow
    pub fn content_store(&mut self, data: &[u8]) -> GeoResult<ContentHash> {
        let hash = ContentHash::of(data);
        if self.content.get(&hash).is_some() {
            self.dedup_hits += 1;
            return Ok(hash);
        }

        let packed = Packed::new(data);
        let bytes = packed.footprint();
        self.check_quota(&Usage {
            content_bytes: bytes as u64,
            ..Usage::default()
        })?;
        self.reserve(Footprint {
            content: bytes,
            ..Footprint::default()
        })?;
        self.store_content(&hash, data.len(), &packed)?;
        Ok(hash)
    }

    /// Bytes of a stored block, expanded if it was stored compressed.
    ///
    /// # Errors
    /// * `NotFound` - No block with that hash
    /// * `Corrupt` - The index points outside the region, or the
    ///   compressed payload does not expand to its recorded size
    pub fn content(&self, hash: &ContentHash) -> GeoResult<Cow<'_, [u8]>> {
        let entry = self.content.get(hash).ok_or(GeoError::NotFound)?;
        let stored = self
            .content_region
            .get(entry.offset, entry.stored as usize)
            .ok_or(GeoError::Corrupt)?;
        if entry.compressed {
            compress::unpack(stored, entry.size).map(Cow::Owned)
        } else {
            Ok(Cow::Borrowed(stored))
        }
    }

    /// Copy up to `buf.len()` bytes of a block into `buf`.
    ///
    /// Returns the full size of the block, which may exceed what was copied.
    pub fn content_read(&self, hash: &ContentHash, buf: &mut [u8]) -> GeoResult<usize> {
        let data = self.content(hash)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.lookups.set(self.lookups.get() + 1);
        Ok(data.len())
    }

    /// Payload size of a stored block.
    pub fn content_size(&self, hash: &ContentHash) -> GeoResult<u64> {
        self.content
            .get(hash)
            .map(|e| e.size)
            .ok_or(GeoError::NotFound)
    }

    /// Number of distinct content blocks.
    pub fn content_count(&self) -> usize {
        self.content.len()
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// Point `path` at existing content in the current view.
    ///
    /// An existing visible file keeps its permissions and owner; a new
    /// path is owned by the current context with the default mask.
    ///
    /// # Errors
    /// * `InvalidArgument` - Malformed path
    /// * `NotFound` - No block with that hash
    /// * `IsADirectory` - `path` is a directory
    /// * `PermissionDenied` - No write permission on the existing file
    /// * `QuotaExceeded`, `OutOfMemory`
    pub fn ref_create(&mut self, path: &str, hash: &ContentHash) -> GeoResult<()> {
        path::validate(path)?;
        if self.content.get(hash).is_none() {
            return Err(GeoError::NotFound);
        }
        let new = self.plan_file_ref(path, *hash)?;
        self.commit_refs(None, &[new])
    }

    /// Hash of the content `path` names in the current view.
    ///
    /// Symbolic links are followed.
    ///
    /// # Errors
    /// * `NotFound` - No visible reference
    /// * `SymlinkLoop` - More than [`SYMLINK_MAX_HOPS`] links
    pub fn ref_resolve(&self, path: &str) -> GeoResult<ContentHash> {
        self.resolve(path).map(|e| e.content)
    }

    /// Current view.
    pub fn view_current(&self) -> ViewId {
        self.current_view
    }

    /// Current branch.
    pub fn branch_current(&self) -> BranchId {
        self.current_branch
    }

    // ------------------------------------------------------------------
    // Lookup helpers
    // ------------------------------------------------------------------

    /// Newest visible reference to `path` in `ancestry`; hidden means absent.
    pub(super) fn lookup_in(&self, path: &str, ancestry: &Ancestry) -> Option<&RefEntry> {
        self.refs
            .best(path, &path::path_hash(path), ancestry)
            .filter(|e| !e.hidden)
    }

    /// Newest visible reference to `path` in the current view.
    pub(super) fn lookup(&self, path: &str) -> Option<&RefEntry> {
        self.lookups.set(self.lookups.get() + 1);
        self.lookup_in(path, &self.ancestry)
    }

    /// Like `lookup`, following symbolic links.
    pub(super) fn resolve(&self, path: &str) -> GeoResult<&RefEntry> {
        let mut entry = self.lookup(path).ok_or(GeoError::NotFound)?;
        for _ in 0..SYMLINK_MAX_HOPS {
            if entry.file_type != FileType::Symlink {
                return Ok(entry);
            }
            let data = self.content(&entry.content)?;
            let target = core::str::from_utf8(&data).map_err(|_| GeoError::Corrupt)?;
            entry = self.lookup(target).ok_or(GeoError::NotFound)?;
        }
        if entry.file_type == FileType::Symlink {
            Err(GeoError::SymlinkLoop)
        } else {
            Ok(entry)
        }
    }

    /// Refuse to create `path` below something that is not a directory.
    pub(super) fn check_parent(&self, path: &str) -> GeoResult<()> {
        let parent = path::parent(path);
        if parent == path::ROOT {
            return Ok(());
        }
        match self.lookup(parent) {
            Some(e) if e.file_type == FileType::File => Err(GeoError::NotADirectory),
            _ => Ok(()),
        }
    }

    /// Reference for writing a regular file at `path`.
    pub(super) fn plan_file_ref(&self, path: &str, content: ContentHash) -> GeoResult<NewRef> {
        match self.lookup(path) {
            Some(e) if e.file_type == FileType::Directory => Err(GeoError::IsADirectory),
            Some(e) => {
                self.ctx.check(e.owner, e.permissions, Permissions::WRITE)?;
                Ok(NewRef {
                    file_type: FileType::File,
                    content,
                    ..NewRef::like(e, path)
                })
            }
            None => {
                self.check_parent(path)?;
                Ok(self.new_ref(path, content, FileType::File))
            }
        }
    }

    /// Fresh reference owned by the current context.
    pub(super) fn new_ref(&self, path: &str, content: ContentHash, file_type: FileType) -> NewRef {
        NewRef {
            path: path.to_string(),
            content,
            hidden: false,
            file_type,
            permissions: Permissions::DEFAULT,
            owner: self.ctx.uid,
        }
    }

    // ------------------------------------------------------------------
    // Write pipeline
    // ------------------------------------------------------------------

    /// Does appending a reference first need an implicit commit?
    pub(super) fn needs_commit(&self) -> bool {
        let Some(view) = self.views.get(&self.current_view) else {
            return true;
        };
        view.branch != self.current_branch
            || self
                .branches
                .values()
                .any(|b| b.id != view.branch && b.base == self.current_view)
    }

    /// Fail with `QuotaExceeded` if `extra` would break the effective quota.
    ///
    /// The branch quota applies if set, else the volume quota, else none.
    pub(super) fn check_quota(&self, extra: &Usage) -> GeoResult<()> {
        if self.ctx.bypasses_quota() {
            return Ok(());
        }

        let branch = QuotaTarget::Branch(self.current_branch);
        let (target, quota) = match self.quotas.get(&branch) {
            Some(q) => (branch, q),
            None => match self.quotas.get(&QuotaTarget::Volume) {
                Some(q) => (QuotaTarget::Volume, q),
                None => return Ok(()),
            },
        };

        if quota.exceeded_by(&self.quota_usage(target), extra) {
            log::warn!("quota exceeded on {:?} by uid {}", target, self.ctx.uid);
            return Err(GeoError::QuotaExceeded);
        }
        Ok(())
    }

    /// Grow regions so the whole footprint fits.
    pub(super) fn reserve(&mut self, fp: Footprint) -> GeoResult<()> {
        if fp.content > 0 {
            self.content_region.reserve(&mut self.pages, fp.content)?;
        }
        if fp.refs > 0 {
            self.ref_region.reserve(&mut self.pages, fp.refs)?;
        }
        if fp.views > 0 {
            self.view_region.reserve(&mut self.pages, fp.views)?;
        }
        Ok(())
    }

    /// Store optional new content and append `refs` to a writable view.
    ///
    /// Callers have validated paths and checked permissions.
    pub(super) fn commit_refs(&mut self, data: Option<(&ContentHash, &[u8])>, refs: &[NewRef]) -> GeoResult<()> {
        let packed = match data {
            Some((hash, bytes)) if self.content.get(hash).is_none() => Some(Packed::new(bytes)),
            _ => None,
        };
        let new_bytes = packed.as_ref().map_or(0, Packed::footprint);
        let commit = self.needs_commit();

        self.check_quota(&Usage {
            content_bytes: new_bytes as u64,
            refs: refs.len() as u64,
            views: commit as u64,
        })?;
        self.reserve(Footprint {
            content: new_bytes,
            refs: refs.len() * REF_RECORD_SIZE,
            views: if commit { VIEW_COMMIT_SIZE } else { 0 },
        })?;

        if let Some((hash, bytes)) = data {
            match &packed {
                Some(p) => self.store_content(hash, bytes.len(), p)?,
                None => self.dedup_hits += 1,
            }
        }
        if commit {
            let view = self.push_view(self.current_view, self.current_branch, AUTO_LABEL)?;
            log::debug!("implicit commit: view {} on branch {}", view, self.current_branch);
            self.enter_view(view);
        }
        for r in refs {
            self.append_ref(r)?;
        }
        Ok(())
    }

    /// Append a new content block of `size` original bytes.
    ///
    /// The caller has checked the hash is not stored yet.
    pub(super) fn store_content(&mut self, hash: &ContentHash, size: usize, packed: &Packed<'_>) -> GeoResult<()> {
        let stored = packed.bytes.len();
        let (flags, original_size) = if packed.compressed {
            (CONTENT_FLAG_COMPRESSED, size as u64)
        } else {
            (0, 0)
        };
        let header = ContentHeader {
            flags,
            size: stored as u64,
            hash: *hash,
            original_size,
        };
        let len = packed.footprint();
        let offset = self.content_region.append_with(&mut self.pages, len, |dst| {
            header.encode(&mut dst[..CONTENT_HEADER_SIZE]);
            dst[CONTENT_HEADER_SIZE..].copy_from_slice(&packed.bytes);
        })?;

        self.content.insert(ContentEntry {
            hash: *hash,
            offset: offset + CONTENT_HEADER_SIZE as u64,
            size: size as u64,
            stored: stored as u64,
            compressed: packed.compressed,
        });
        self.total_content_bytes += len as u64;
        if packed.compressed {
            self.compressed_bytes += (size - stored) as u64;
            self.compressed_count += 1;
            log::debug!("content {}: compressed {} -> {} bytes", hash.short(), size, stored);
        }
        Ok(())
    }

    /// Append one reference record to the current view.
    pub(super) fn append_ref(&mut self, new: &NewRef) -> GeoResult<()> {
        let entry = RefEntry {
            path: new.path.clone(),
            path_hash: path::path_hash(&new.path),
            content: new.content,
            view: self.current_view,
            created: ticks(),
            hidden: new.hidden,
            file_type: new.file_type,
            permissions: new.permissions,
            owner: new.owner,
        };
        let rec = RefRecord {
            hidden: entry.hidden,
            path_hash: entry.path_hash,
            content: entry.content,
            view: entry.view,
            created: entry.created,
            file_type: entry.file_type,
            permissions: entry.permissions,
            owner: entry.owner,
            path: &entry.path,
        };
        self.ref_region
            .append_with(&mut self.pages, REF_RECORD_SIZE, |dst| rec.encode(dst))?;

        let branch = self.views.get(&entry.view).map_or(self.current_branch, |v| v.branch);
        self.usage.entry(branch).or_default().refs += 1;
        self.total_refs += 1;
        self.refs.push(entry);
        Ok(())
    }

    /// Record a new view and make it the head of `branch`.
    ///
    /// Does not switch to it.
    pub(super) fn push_view(&mut self, parent: ViewId, branch: BranchId, label: &str) -> GeoResult<ViewId> {
        let id = ViewId(self.next_view);
        let entry = ViewEntry {
            id,
            parent,
            branch,
            created: ticks(),
            label: record::truncate(label, LABEL_SIZE - 1).to_string(),
        };
        let rec = ViewRecord {
            id,
            parent,
            branch: Some(branch),
            created: entry.created,
            label: &entry.label,
        };
        self.view_region
            .append_with(&mut self.pages, VIEW_V2_SIZE, |dst| rec.encode(dst))?;

        self.next_view += 1;
        self.total_views += 1;
        self.usage.entry(branch).or_default().views += 1;
        self.views.insert(id, entry);

        if let Some(b) = self.branches.get_mut(&branch) {
            b.head = id;
        }
        self.append_branch_record(branch)?;
        Ok(id)
    }

    /// Persist the current state of a branch (newest record wins on load).
    pub(super) fn append_branch_record(&mut self, id: BranchId) -> GeoResult<()> {
        let Some(b) = self.branches.get(&id) else {
            return Err(GeoError::NotFound);
        };
        let rec = BranchRecord {
            id: b.id,
            base: b.base,
            head: b.head,
            created: b.created,
            name: &b.name,
        };
        self.view_region
            .append_with(&mut self.pages, BRANCH_RECORD_SIZE, |dst| rec.encode(dst))?;
        Ok(())
    }

    /// Make `view` current (and its branch), rebuilding the ancestry.
    pub(super) fn enter_view(&mut self, view: ViewId) {
        self.current_view = view;
        if let Some(v) = self.views.get(&view) {
            self.current_branch = v.branch;
        }
        self.rebuild_ancestry();
    }

    pub(super) fn rebuild_ancestry(&mut self) {
        self.ancestry = Ancestry::build(&self.views, self.current_view);
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Log the statistics.
    pub fn dump_stats(&self) {
        let s = self.stats();
        log::info!("=== GeoFS volume ===");
        log::info!("  view {} on branch {}", self.current_view, self.current_branch);
        log::info!(
            "  content: {} blocks, {} bytes, {} dedup hits",
            self.content.len(),
            s.total_content_bytes,
            s.dedup_hits
        );
        log::info!(
            "  compressed: {} blocks, {} bytes saved",
            s.compressed_count,
            s.compressed_bytes
        );
        log::info!("  refs: {}  views: {}  branches: {}", s.total_refs, s.total_views, s.total_branches);
        log::info!(
            "  regions used: content {} / refs {} / views {} bytes",
            s.content_used,
            s.ref_used,
            s.view_used
        );
        log::info!("  lookups: {}", s.total_lookups);
    }

    /// Log every reference record.
    pub fn dump_refs(&self) {
        log::info!("=== GeoFS references ({}) ===", self.refs.len());
        for e in self.refs.iter() {
            log::info!(
                "  [v{}] {}{} {} -> {}{}",
                e.view,
                e.file_type.tag(),
                perms_string(e.permissions),
                e.path,
                e.content.short(),
                if e.hidden { " (hidden)" } else { "" }
            );
        }
    }

    /// Log the view forest.
    pub fn dump_views(&self) {
        log::info!("=== GeoFS views ({}) ===", self.views.len());
        for v in self.views.values() {
            let marker = if v.id == self.current_view { "*" } else { " " };
            log::info!("  {}{} parent {} branch {} \"{}\"", marker, v.id, v.parent, v.branch, v.label);
        }
    }
}

/// `rwx`-style rendering of a permission mask.
pub(super) fn perms_string(p: Permissions) -> String {
    let mut s = String::with_capacity(3);
    s.push(if p.contains(Permissions::READ) { 'r' } else { '-' });
    s.push(if p.contains(Permissions::WRITE) { 'w' } else { '-' });
    s.push(if p.contains(Permissions::EXEC) { 'x' } else { '-' });
    s
}

impl<A: PageAllocator> Drop for Volume<A> {
    fn drop(&mut self) {
        self.content_region.release(&mut self.pages);
        self.ref_region.release(&mut self.pages);
        self.view_region.release(&mut self.pages);
    }
}

