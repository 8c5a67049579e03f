//! View operations
//!
//! Views are immutable snapshot ids in a forest linked by parent ids.
//! Creating one never copies data; hiding a path appends a masking
//! reference in a fresh child view.

use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use crate::mm::PageAllocator;

use super::access::Permissions;
use super::error::{GeoError, GeoResult};
use super::hash::ContentHash;
use super::index::{Ancestry, ViewEntry};
use super::path;
use super::record::REF_RECORD_SIZE;
use super::types::{ChangeKind, DiffEntry, FileType, Usage, ViewId, ViewInfo};
use super::volume::{Footprint, NewRef, Volume, VIEW_COMMIT_SIZE};

/// What a path looks like in one snapshot.
pub(super) type PathState = Option<(ContentHash, FileType)>;

impl From<&ViewEntry> for ViewInfo {
    fn from(v: &ViewEntry) -> Self {
        Self {
            id: v.id,
            parent: v.parent,
            branch: v.branch,
            created: v.created,
            label: v.label.clone(),
        }
    }
}

impl<A: PageAllocator> Volume<A> {
    /// Record a child of the current view on the current branch.
    ///
    /// The new view becomes the branch head but is not switched to.
    /// Without a label it is called `View <id>`.
    pub fn view_create(&mut self, label: Option<&str>) -> GeoResult<ViewId> {
        self.check_quota(&Usage {
            views: 1,
            ..Usage::default()
        })?;
        self.reserve(Footprint {
            views: VIEW_COMMIT_SIZE,
            ..Footprint::default()
        })?;

        let label = match label {
            Some(l) => String::from(l),
            None => format!("View {}", self.next_view),
        };
        let id = self.push_view(self.current_view, self.current_branch, &label)?;
        log::debug!("view {} \"{}\" created on branch {}", id, label, self.current_branch);
        Ok(id)
    }

    /// Make `id` the current view, and its branch the current branch.
    ///
    /// # Errors
    /// * `InvalidArgument` - No such view
    pub fn view_switch(&mut self, id: ViewId) -> GeoResult<()> {
        if !self.views.contains_key(&id) {
            return Err(GeoError::InvalidArgument);
        }
        self.enter_view(id);
        log::debug!("switched to view {} (branch {})", id, self.current_branch);
        Ok(())
    }

    /// Hide `path` in a new child view, which becomes current.
    ///
    /// Older views still see the path.
    ///
    /// # Errors
    /// * `NotFound` - `path` is not visible in the current view
    /// * `PermissionDenied` - No write permission on `path`
    pub fn view_hide(&mut self, path: &str) -> GeoResult<()> {
        path::validate(path)?;
        let entry = self.lookup(path).ok_or(GeoError::NotFound)?;
        self.ctx.check(entry.owner, entry.permissions, Permissions::WRITE)?;
        let hide = NewRef::hiding(entry);

        self.check_quota(&Usage {
            refs: 1,
            views: 1,
            ..Usage::default()
        })?;
        self.reserve(Footprint {
            refs: REF_RECORD_SIZE,
            views: VIEW_COMMIT_SIZE,
            ..Footprint::default()
        })?;

        let label = format!("Hide: {}", path);
        let view = self.push_view(self.current_view, self.current_branch, &label)?;
        self.enter_view(view);
        self.append_ref(&hide)
    }

    /// Describe one view.
    pub fn view_info(&self, id: ViewId) -> GeoResult<ViewInfo> {
        self.views.get(&id).map(ViewInfo::from).ok_or(GeoError::NotFound)
    }

    /// Call `f` for each view in id order until it breaks.
    pub fn view_list<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&ViewInfo) -> ControlFlow<()>,
    {
        let mut count = 0;
        for v in self.views.values() {
            count += 1;
            if f(&ViewInfo::from(v)).is_break() {
                break;
            }
        }
        count
    }

    /// All views in id order.
    pub fn views(&self) -> Vec<ViewInfo> {
        self.views.values().map(ViewInfo::from).collect()
    }

    /// Report every path whose visible state differs between `a` and `b`.
    ///
    /// Kinds are relative to `a`: `Added` exists only in `b`, `Hidden`
    /// only in `a`. Paths are reported in sorted order.
    ///
    /// # Errors
    /// * `InvalidArgument` - Either view does not exist
    pub fn view_diff<F>(&self, a: ViewId, b: ViewId, f: F) -> GeoResult<usize>
    where
        F: FnMut(&DiffEntry) -> ControlFlow<()>,
    {
        if !self.views.contains_key(&a) || !self.views.contains_key(&b) {
            return Err(GeoError::InvalidArgument);
        }
        let chain_a = Ancestry::build(&self.views, a);
        let chain_b = Ancestry::build(&self.views, b);

        let paths: BTreeSet<&str> = self
            .refs
            .paths_in(&chain_a)
            .chain(self.refs.paths_in(&chain_b))
            .collect();
        Ok(self.diff_paths(paths, &chain_a, &chain_b, f))
    }

    /// Visible state of `path` in a snapshot.
    pub(super) fn state_in(&self, path: &str, chain: &Ancestry) -> PathState {
        self.lookup_in(path, chain).map(|e| (e.content, e.file_type))
    }

    /// Classify each of `paths` between two snapshots.
    pub(super) fn diff_paths<'p, I, F>(&self, paths: I, a: &Ancestry, b: &Ancestry, mut f: F) -> usize
    where
        I: IntoIterator<Item = &'p str>,
        F: FnMut(&DiffEntry) -> ControlFlow<()>,
    {
        let mut count = 0;
        for p in paths {
            let (kind, content) = match (self.state_in(p, a), self.state_in(p, b)) {
                (None, Some((c, _))) => (ChangeKind::Added, c),
                (Some(_), None) => (ChangeKind::Hidden, ContentHash::ZERO),
                (Some(x), Some(y)) if x != y => (ChangeKind::Modified, y.0),
                _ => continue,
            };
            count += 1;
            let entry = DiffEntry {
                path: p.into(),
                kind,
                content,
            };
            if f(&entry).is_break() {
                break;
            }
        }
        count
    }
}
