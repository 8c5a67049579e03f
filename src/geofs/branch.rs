//! Branches and merges
//!
//! A branch is a named lineage over the view forest: a base view it forked
//! from and a head view it has grown to. Creating one copies nothing.
//!
//! # Merge
//! Three-way, from the deepest common ancestor `A` of the two heads:
//! - Changed only on the source: applied onto the current branch
//! - Changed on both sides to the same state: nothing to do
//! - Changed on both sides differently: conflict, current side kept
//!
//! Applied changes land in one new view on the current branch whose parent
//! is the current head; that view becomes head and current view.

use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::ops::ControlFlow;

use crate::mm::PageAllocator;
use crate::platform::ticks;

use super::error::{GeoError, GeoResult};
use super::hash::ContentHash;
use super::index::{Ancestry, BranchEntry};
use super::record::{BRANCH_RECORD_SIZE, LABEL_SIZE, REF_RECORD_SIZE};
use super::types::{BranchId, BranchInfo, DiffEntry, MergeConflict, MergeReport, Usage};
use super::volume::{Footprint, NewRef, Volume, VIEW_COMMIT_SIZE};

impl From<&BranchEntry> for BranchInfo {
    fn from(b: &BranchEntry) -> Self {
        Self {
            id: b.id,
            name: b.name.clone(),
            base: b.base,
            head: b.head,
            created: b.created,
        }
    }
}

/// Check a branch name: non-empty, no NUL, fits a label field.
fn validate_name(name: &str) -> GeoResult<()> {
    if name.is_empty() || name.len() >= LABEL_SIZE || name.contains('\0') {
        return Err(GeoError::InvalidArgument);
    }
    Ok(())
}

impl<A: PageAllocator> Volume<A> {
    /// Fork a new branch at the current view. Does not switch to it.
    ///
    /// # Errors
    /// * `InvalidArgument` - Empty name, NUL byte, or longer than 63 bytes
    /// * `AlreadyExists` - Another branch has this name
    pub fn branch_create(&mut self, name: &str) -> GeoResult<BranchId> {
        validate_name(name)?;
        if self.branch_find(name).is_some() {
            return Err(GeoError::AlreadyExists);
        }
        self.reserve(Footprint {
            views: BRANCH_RECORD_SIZE,
            ..Footprint::default()
        })?;

        let id = BranchId(self.next_branch);
        self.branches.insert(
            id,
            BranchEntry {
                id,
                name: name.to_string(),
                base: self.current_view,
                head: self.current_view,
                created: ticks(),
            },
        );
        self.next_branch += 1;
        self.usage.entry(id).or_default();
        self.append_branch_record(id)?;

        log::info!("branch {} \"{}\" created at view {}", id, name, self.current_view);
        Ok(id)
    }

    /// Switch to the head of branch `id`.
    ///
    /// # Errors
    /// * `NotFound` - No such branch
    pub fn branch_switch(&mut self, id: BranchId) -> GeoResult<()> {
        let head = self.branches.get(&id).ok_or(GeoError::NotFound)?.head;
        self.current_branch = id;
        self.current_view = head;
        self.rebuild_ancestry();
        log::debug!("switched to branch {} at view {}", id, head);
        Ok(())
    }

    /// Switch to the branch called `name`.
    pub fn branch_switch_name(&mut self, name: &str) -> GeoResult<()> {
        let id = self.branch_find(name).ok_or(GeoError::NotFound)?;
        self.branch_switch(id)
    }

    /// Id of the branch called `name`.
    pub fn branch_find(&self, name: &str) -> Option<BranchId> {
        self.branches.values().find(|b| b.name == name).map(|b| b.id)
    }

    /// Describe one branch.
    pub fn branch_info(&self, id: BranchId) -> GeoResult<BranchInfo> {
        self.branches.get(&id).map(BranchInfo::from).ok_or(GeoError::NotFound)
    }

    /// Call `f` for each branch in id order until it breaks.
    pub fn branch_list<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&BranchInfo) -> ControlFlow<()>,
    {
        let mut count = 0;
        for b in self.branches.values() {
            count += 1;
            if f(&BranchInfo::from(b)).is_break() {
                break;
            }
        }
        count
    }

    /// All branches in id order.
    pub fn branches(&self) -> Vec<BranchInfo> {
        self.branches.values().map(BranchInfo::from).collect()
    }

    /// Head chain of a branch.
    fn head_chain(&self, id: BranchId) -> GeoResult<Ancestry> {
        let head = self.branches.get(&id).ok_or(GeoError::NotFound)?.head;
        Ok(Ancestry::build(&self.views, head))
    }

    /// Chain of the deepest view shared by two chains (empty if none).
    fn base_chain(&self, a: &Ancestry, b: &Ancestry) -> Ancestry {
        a.common_ancestor(b)
            .map(|v| Ancestry::build(&self.views, v))
            .unwrap_or_default()
    }

    /// Paths whose state in `tip` differs from `base`.
    fn changed_since<'s>(&'s self, base: &Ancestry, tip: &'s Ancestry) -> BTreeSet<&'s str> {
        self.refs
            .paths_in(tip)
            .filter(|p| self.state_in(p, base) != self.state_in(p, tip))
            .collect()
    }

    /// Report the paths branch `b` changed since it diverged from `a`,
    /// classified against the head of `a`.
    ///
    /// # Errors
    /// * `NotFound` - Either branch does not exist
    pub fn branch_diff<F>(&self, a: BranchId, b: BranchId, f: F) -> GeoResult<usize>
    where
        F: FnMut(&DiffEntry) -> ControlFlow<()>,
    {
        let chain_a = self.head_chain(a)?;
        let chain_b = self.head_chain(b)?;
        let base = self.base_chain(&chain_a, &chain_b);
        let changed = self.changed_since(&base, &chain_b);
        Ok(self.diff_paths(changed, &chain_a, &chain_b, f))
    }

    /// Merge branch `source` into the current branch.
    ///
    /// An empty label becomes `Merge <source name>`. Conflicts do not fail
    /// the merge; they are returned in the report.
    ///
    /// # Errors
    /// * `PermissionDenied` - The context is not privileged
    /// * `NotFound` - No such source branch
    /// * `InvalidArgument` - `source` is the current branch
    /// * `QuotaExceeded`, `OutOfMemory`
    pub fn branch_merge(&mut self, source: BranchId, label: &str) -> GeoResult<MergeReport> {
        self.ctx.require_privileged()?;
        let source_name = self.branches.get(&source).ok_or(GeoError::NotFound)?.name.clone();
        if source == self.current_branch {
            return Err(GeoError::InvalidArgument);
        }
        let ours_head = self.branches.get(&self.current_branch).ok_or(GeoError::Corrupt)?.head;

        let theirs = self.head_chain(source)?;
        let ours = Ancestry::build(&self.views, ours_head);
        let base = self.base_chain(&theirs, &ours);

        let mut apply: Vec<NewRef> = Vec::new();
        let mut conflicts: Vec<MergeConflict> = Vec::new();
        for p in self.changed_since(&base, &theirs) {
            let their_state = self.state_in(p, &theirs);
            let our_state = self.state_in(p, &ours);

            if our_state == self.state_in(p, &base) {
                match (self.lookup_in(p, &theirs), self.lookup_in(p, &ours)) {
                    (Some(t), _) => apply.push(NewRef::like(t, p)),
                    (None, Some(o)) => apply.push(NewRef::hiding(o)),
                    (None, None) => {}
                }
            } else if our_state != their_state {
                let hash = |s: Option<(ContentHash, _)>| s.map_or(ContentHash::ZERO, |(c, _)| c);
                log::warn!("merge conflict on {}", p);
                conflicts.push(MergeConflict {
                    path: p.to_string(),
                    ours: hash(our_state),
                    theirs: hash(their_state),
                });
            }
        }

        self.check_quota(&Usage {
            content_bytes: 0,
            refs: apply.len() as u64,
            views: 1,
        })?;
        self.reserve(Footprint {
            content: 0,
            refs: apply.len() * REF_RECORD_SIZE,
            views: VIEW_COMMIT_SIZE,
        })?;

        let label = if label.is_empty() {
            format!("Merge {}", source_name)
        } else {
            String::from(label)
        };
        let view = self.push_view(ours_head, self.current_branch, &label)?;
        self.enter_view(view);
        for r in &apply {
            self.append_ref(r)?;
        }

        log::info!(
            "merged branch {} into {}: {} applied, {} conflicts (view {})",
            source_name,
            self.current_branch,
            apply.len(),
            conflicts.len(),
            view
        );
        Ok(MergeReport {
            view,
            applied: apply.len(),
            conflicts,
        })
    }
}
