//! Quotas
//!
//! Limits are records in the view region; the newest one for a target
//! wins. Usage is never stored: it is derived from what the regions hold,
//! so it survives save and load unchanged.

use crate::mm::PageAllocator;
use crate::platform::ticks;

use super::error::{GeoError, GeoResult};
use super::record::{QuotaRecord, QUOTA_RECORD_SIZE};
use super::types::{Quota, QuotaTarget, Usage};
use super::volume::Volume;

impl<A: PageAllocator> Volume<A> {
    /// Replace the limits for `target`. Privileged only.
    ///
    /// # Errors
    /// * `PermissionDenied` - The context is not privileged
    /// * `NotFound` - `target` names an unknown branch
    pub fn quota_set(&mut self, target: QuotaTarget, quota: Quota) -> GeoResult<()> {
        self.ctx.require_privileged()?;
        if let QuotaTarget::Branch(id) = target {
            if !self.branches.contains_key(&id) {
                return Err(GeoError::NotFound);
            }
        }

        let rec = QuotaRecord {
            target,
            quota,
            created: ticks(),
        };
        self.view_region
            .append_with(&mut self.pages, QUOTA_RECORD_SIZE, |dst| rec.encode(dst))?;
        self.quotas.insert(target, quota);

        log::info!(
            "quota on {:?}: {} bytes, {} refs, {} views",
            target,
            quota.max_content_bytes,
            quota.max_refs,
            quota.max_views
        );
        Ok(())
    }

    /// Limits configured for `target`.
    ///
    /// # Errors
    /// * `NotFound` - No quota set
    pub fn quota_get(&self, target: QuotaTarget) -> GeoResult<Quota> {
        self.quotas.get(&target).copied().ok_or(GeoError::NotFound)
    }

    /// Accumulated usage counted against `target`.
    ///
    /// Content is shared between branches, so a branch is charged the
    /// volume-wide content bytes; refs and views are per branch.
    pub fn quota_usage(&self, target: QuotaTarget) -> Usage {
        match target {
            QuotaTarget::Volume => Usage {
                content_bytes: self.total_content_bytes,
                refs: self.total_refs,
                views: self.total_views,
            },
            QuotaTarget::Branch(id) => {
                let own = self.usage.get(&id).copied().unwrap_or_default();
                Usage {
                    content_bytes: self.total_content_bytes,
                    ..own
                }
            }
        }
    }
}
