//! Saving and loading volumes
//!
//! # Layout
//! ```text
//! start            superblock (512 bytes)
//! start + 1        content region, ceil(content_used / 512) sectors
//! ...              reference region
//! ...              view region
//! ```
//! Each region is its used bytes back to back, zero-padded to a sector
//! boundary. The superblock checksum is SHA-256 over the concatenated used
//! bytes of all three regions.
//!
//! # Loading
//! The regions are read into fresh single-segment memory and every index
//! is rebuilt by scanning records. Anything that does not parse is
//! reported as `Corrupt`; nothing is repaired.

use alloc::string::ToString;

use crate::mm::{pages_for, PageAllocator};
use crate::platform::{BlockDevice, IoError, Sector, SECTOR_SIZE};

use super::compress;
use super::error::{GeoError, GeoResult};
use super::hash::{ContentHash, HashBuilder};
use super::index::{BranchEntry, ContentEntry, RefEntry, ViewEntry};
use super::record::{
    ContentHeader, Reader, RefRecord, ViewRegionRecord, Writer, CONTENT_HEADER_SIZE, REF_RECORD_SIZE,
};
use super::region::Region;
use super::types::{BranchId, ViewId, VolumeConfig};
use super::volume::{Volume, MAIN_BRANCH_NAME};

/// "KGEOFPHR" as a little-endian integer.
pub const PERSIST_MAGIC: u64 = 0x5248_5046_4F45_474B;

/// Format version written by `save`.
pub const PERSIST_VERSION: u32 = 2;

/// Oldest version `load` accepts (no branches).
pub const PERSIST_VERSION_V1: u32 = 1;

/// Largest region a loaded image may claim.
pub const MAX_REGION_BYTES: u64 = 1 << 30;

/// Sectors needed for `bytes` bytes.
const fn sectors_for(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE as u64)
}

/// The first sector of a persisted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Superblock {
    pub version: u32,
    pub flags: u32,
    pub current_view: ViewId,
    pub next_view: u64,
    pub created: u64,
    pub total_content_bytes: u64,
    pub total_refs: u64,
    pub total_views: u64,
    pub dedup_hits: u64,
    pub total_lookups: u64,
    pub content_used: u64,
    pub ref_used: u64,
    pub view_used: u64,
    pub content_start: u64,
    pub content_sectors: u64,
    pub ref_start: u64,
    pub ref_sectors: u64,
    pub view_start: u64,
    pub view_sectors: u64,
    pub checksum: ContentHash,
    pub current_branch: BranchId,
    pub next_branch: u64,
    pub total_branches: u64,
}

impl Superblock {
    pub fn encode(&self) -> Sector {
        let mut out = [0u8; SECTOR_SIZE];
        let mut w = Writer::new(&mut out);
        w.u64(PERSIST_MAGIC)
            .u32(self.version)
            .u32(self.flags)
            .u64(self.current_view.0)
            .u64(self.next_view)
            .u64(self.created)
            .u64(self.total_content_bytes)
            .u64(self.total_refs)
            .u64(self.total_views)
            .u64(self.dedup_hits)
            .u64(self.total_lookups)
            .u64(self.content_used)
            .u64(self.ref_used)
            .u64(self.view_used)
            .u64(self.content_start)
            .u64(self.content_sectors)
            .u64(self.ref_start)
            .u64(self.ref_sectors)
            .u64(self.view_start)
            .u64(self.view_sectors)
            .hash(&self.checksum)
            .u64(self.current_branch.0)
            .u64(self.next_branch)
            .u64(self.total_branches);
        out
    }

    /// # Errors
    /// * `Corrupt` - Bad magic
    /// * `UnsupportedVersion` - Neither version 1 nor 2
    pub fn decode(bytes: &Sector) -> GeoResult<Self> {
        let mut r = Reader::new(bytes);
        if r.u64()? != PERSIST_MAGIC {
            return Err(GeoError::Corrupt);
        }
        let version = r.u32()?;
        if version != PERSIST_VERSION && version != PERSIST_VERSION_V1 {
            return Err(GeoError::UnsupportedVersion);
        }

        Ok(Self {
            version,
            flags: r.u32()?,
            current_view: ViewId(r.u64()?),
            next_view: r.u64()?,
            created: r.u64()?,
            total_content_bytes: r.u64()?,
            total_refs: r.u64()?,
            total_views: r.u64()?,
            dedup_hits: r.u64()?,
            total_lookups: r.u64()?,
            content_used: r.u64()?,
            ref_used: r.u64()?,
            view_used: r.u64()?,
            content_start: r.u64()?,
            content_sectors: r.u64()?,
            ref_start: r.u64()?,
            ref_sectors: r.u64()?,
            view_start: r.u64()?,
            view_sectors: r.u64()?,
            checksum: r.hash()?,
            current_branch: BranchId(r.u64()?),
            next_branch: r.u64()?,
            total_branches: r.u64()?,
        })
    }

    /// Regions must be packed right after the superblock in order.
    fn layout_is_consistent(&self) -> bool {
        self.content_start == 1
            && self.content_sectors == sectors_for(self.content_used)
            && self.ref_start == self.content_start + self.content_sectors
            && self.ref_sectors == sectors_for(self.ref_used)
            && self.view_start == self.ref_start + self.ref_sectors
            && self.view_sectors == sectors_for(self.view_used)
    }

    /// Every region fits in [`MAX_REGION_BYTES`] and the image in `u64` sectors past `start`.
    fn regions_in_bounds(&self, start: u64) -> bool {
        [self.content_used, self.ref_used, self.view_used]
            .iter()
            .all(|&used| used <= MAX_REGION_BYTES)
            && start.checked_add(self.total_sectors()).is_some()
    }

    /// Sectors occupied on the device, superblock included.
    pub fn total_sectors(&self) -> u64 {
        1 + self.content_sectors + self.ref_sectors + self.view_sectors
    }
}

/// Writes during save: running out of device is `VolumeFull`.
fn save_err(e: IoError) -> GeoError {
    match e {
        IoError::OutOfRange => GeoError::VolumeFull,
        e => e.into(),
    }
}

/// Stream the used bytes of `region` to sectors from `lba`.
fn write_region(region: &Region, dev: &mut dyn BlockDevice, drive: u8, mut lba: u64) -> GeoResult<u64> {
    let first = lba;
    let mut sector: Sector = [0; SECTOR_SIZE];
    let mut fill = 0;

    for mut chunk in region.chunks() {
        while !chunk.is_empty() {
            let n = chunk.len().min(SECTOR_SIZE - fill);
            sector[fill..fill + n].copy_from_slice(&chunk[..n]);
            fill += n;
            chunk = &chunk[n..];
            if fill == SECTOR_SIZE {
                dev.write_sector(drive, lba, &sector).map_err(save_err)?;
                lba += 1;
                fill = 0;
            }
        }
    }
    if fill > 0 {
        sector[fill..].fill(0);
        dev.write_sector(drive, lba, &sector).map_err(save_err)?;
        lba += 1;
    }
    Ok(lba - first)
}

/// Read `used` bytes from sectors at `lba` into an empty region.
fn read_region<A: PageAllocator>(
    region: &mut Region,
    pages: &mut A,
    dev: &mut dyn BlockDevice,
    drive: u8,
    mut lba: u64,
    used: u64,
    checksum: &mut HashBuilder,
) -> GeoResult<()> {
    let mut sector: Sector = [0; SECTOR_SIZE];
    let mut left = used as usize;
    while left > 0 {
        dev.read_sector(drive, lba, &mut sector)?;
        let take = left.min(SECTOR_SIZE);
        region.append(pages, &sector[..take])?;
        checksum.update(&sector[..take]);
        left -= take;
        lba += 1;
    }
    Ok(())
}

impl<A: PageAllocator> Volume<A> {
    /// Write the volume to `drive` starting at sector `start`.
    ///
    /// Returns the number of sectors written.
    ///
    /// # Errors
    /// * `VolumeFull` - The device ends before the image does
    /// * `Io` - Any other device failure
    pub fn save(&self, dev: &mut dyn BlockDevice, drive: u8, start: u64) -> GeoResult<u64> {
        let stats = self.stats();

        let mut checksum = HashBuilder::new();
        for region in [&self.content_region, &self.ref_region, &self.view_region] {
            for chunk in region.chunks() {
                checksum.update(chunk);
            }
        }

        let content_sectors = sectors_for(stats.content_used);
        let ref_sectors = sectors_for(stats.ref_used);
        let view_sectors = sectors_for(stats.view_used);
        let sb = Superblock {
            version: PERSIST_VERSION,
            flags: 0,
            current_view: self.current_view,
            next_view: self.next_view,
            created: self.created,
            total_content_bytes: stats.total_content_bytes,
            total_refs: stats.total_refs,
            total_views: stats.total_views,
            dedup_hits: stats.dedup_hits,
            total_lookups: stats.total_lookups,
            content_used: stats.content_used,
            ref_used: stats.ref_used,
            view_used: stats.view_used,
            content_start: 1,
            content_sectors,
            ref_start: 1 + content_sectors,
            ref_sectors,
            view_start: 1 + content_sectors + ref_sectors,
            view_sectors,
            checksum: checksum.finish(),
            current_branch: self.current_branch,
            next_branch: self.next_branch,
            total_branches: stats.total_branches,
        };

        dev.write_sector(drive, start, &sb.encode()).map_err(save_err)?;
        let mut written = 1;
        written += write_region(&self.content_region, dev, drive, start + sb.content_start)?;
        written += write_region(&self.ref_region, dev, drive, start + sb.ref_start)?;
        written += write_region(&self.view_region, dev, drive, start + sb.view_start)?;
        dev.flush(drive)?;
        debug_assert_eq!(written, sb.total_sectors());

        log::info!(
            "volume saved to drive {} at sector {}: {} sectors ({} refs, {} views, {} branches)",
            drive,
            start,
            written,
            sb.total_refs,
            sb.total_views,
            sb.total_branches
        );
        Ok(written)
    }

    /// Read a volume saved at sector `start` of `drive`.
    ///
    /// The loaded volume uses the kernel access context.
    ///
    /// # Errors
    /// * `Io` - Device failure
    /// * `Corrupt` - Bad magic, layout, checksum or record
    /// * `UnsupportedVersion` - Unknown format version
    /// * `OutOfMemory` - No pages for the regions
    pub fn load(pages: A, dev: &mut dyn BlockDevice, drive: u8, start: u64) -> GeoResult<Self> {
        let mut raw: Sector = [0; SECTOR_SIZE];
        dev.read_sector(drive, start, &mut raw)?;
        let sb = Superblock::decode(&raw).inspect_err(|e| log::error!("volume load: superblock: {}", e))?;
        if !sb.layout_is_consistent() {
            log::error!("volume load: inconsistent region layout");
            return Err(GeoError::Corrupt);
        }
        if !sb.regions_in_bounds(start) {
            log::error!(
                "volume load: regions out of bounds ({}/{}/{} bytes)",
                sb.content_used,
                sb.ref_used,
                sb.view_used
            );
            return Err(GeoError::Corrupt);
        }

        let config = VolumeConfig::new(
            pages_for(sb.content_used as usize).max(VolumeConfig::DEFAULT_CONTENT_PAGES),
            pages_for(sb.ref_used as usize).max(VolumeConfig::DEFAULT_REF_PAGES),
            pages_for(sb.view_used as usize).max(VolumeConfig::DEFAULT_VIEW_PAGES),
        );
        let mut vol = Self::empty(pages, config)?;

        let mut checksum = HashBuilder::new();
        read_region(
            &mut vol.content_region,
            &mut vol.pages,
            dev,
            drive,
            start + sb.content_start,
            sb.content_used,
            &mut checksum,
        )?;
        read_region(
            &mut vol.ref_region,
            &mut vol.pages,
            dev,
            drive,
            start + sb.ref_start,
            sb.ref_used,
            &mut checksum,
        )?;
        read_region(
            &mut vol.view_region,
            &mut vol.pages,
            dev,
            drive,
            start + sb.view_start,
            sb.view_used,
            &mut checksum,
        )?;

        let unchecked = sb.version == PERSIST_VERSION_V1 && sb.checksum.is_zero();
        if !unchecked && checksum.finish() != sb.checksum {
            log::error!("volume load: checksum mismatch");
            return Err(GeoError::Corrupt);
        }

        vol.rebuild(&sb).inspect_err(|e| log::error!("volume load: {}", e))?;
        log::info!(
            "volume loaded from drive {} at sector {}: v{}, {} refs, {} views, {} branches",
            drive,
            start,
            sb.version,
            vol.total_refs,
            vol.total_views,
            vol.branches.len()
        );
        Ok(vol)
    }

    /// Rebuild every index from freshly loaded regions.
    fn rebuild(&mut self, sb: &Superblock) -> GeoResult<()> {
        self.scan_content()?;
        self.scan_views(sb)?;
        self.scan_refs()?;

        if !self.views.contains_key(&sb.current_view) {
            return Err(GeoError::Corrupt);
        }
        if self.branches.is_empty() {
            // Images without branch records predate branches: everything is main.
            self.branches.insert(
                BranchId::MAIN,
                BranchEntry {
                    id: BranchId::MAIN,
                    name: MAIN_BRANCH_NAME.to_string(),
                    base: ViewId::GENESIS,
                    head: sb.current_view,
                    created: sb.created,
                },
            );
        }
        if !self.branches.contains_key(&sb.current_branch) {
            return Err(GeoError::Corrupt);
        }

        let max_view = self.views.keys().next_back().map_or(0, |v| v.0 + 1);
        let max_branch = self.branches.keys().next_back().map_or(0, |b| b.0 + 1);
        self.next_view = sb.next_view.max(max_view);
        self.next_branch = sb.next_branch.max(max_branch);
        self.created = sb.created;
        self.dedup_hits = sb.dedup_hits;
        self.lookups.set(sb.total_lookups);

        self.current_view = sb.current_view;
        self.current_branch = sb.current_branch;
        self.rebuild_ancestry();
        Ok(())
    }

    fn scan_content(&mut self) -> GeoResult<()> {
        let used = self.content_region.used();
        let mut offset = 0;
        while offset < used {
            let tail = self.content_region.tail_from(offset).ok_or(GeoError::Corrupt)?;
            let header = ContentHeader::decode(tail)?;
            let len = header
                .size
                .checked_add(CONTENT_HEADER_SIZE as u64)
                .filter(|&len| len <= tail.len() as u64)
                .ok_or(GeoError::Corrupt)?;
            let compressed = header.is_compressed();
            if compressed && !compress::plausible(header.size, header.original_size) {
                return Err(GeoError::Corrupt);
            }
            self.content.insert(ContentEntry {
                hash: header.hash,
                offset: offset + CONTENT_HEADER_SIZE as u64,
                size: header.logical_size(),
                stored: header.size,
                compressed,
            });
            self.total_content_bytes += len;
            if compressed {
                self.compressed_bytes += header.original_size - header.size;
                self.compressed_count += 1;
            }
            offset += len;
        }
        Ok(())
    }

    fn scan_views(&mut self, sb: &Superblock) -> GeoResult<()> {
        let used = self.view_region.used();
        let mut offset = 0;
        while offset < used {
            let tail = self.view_region.tail_from(offset).ok_or(GeoError::Corrupt)?;
            let (rec, size) = ViewRegionRecord::decode(tail)?;
            match rec {
                ViewRegionRecord::View(v) => {
                    let branch = v.branch.unwrap_or(BranchId::MAIN);
                    self.views.insert(
                        v.id,
                        ViewEntry {
                            id: v.id,
                            parent: v.parent,
                            branch,
                            created: v.created,
                            label: v.label.to_string(),
                        },
                    );
                    self.usage.entry(branch).or_default().views += 1;
                    self.total_views += 1;
                }
                ViewRegionRecord::Branch(b) => {
                    self.branches.insert(
                        b.id,
                        BranchEntry {
                            id: b.id,
                            name: b.name.to_string(),
                            base: b.base,
                            head: b.head,
                            created: b.created,
                        },
                    );
                }
                ViewRegionRecord::Quota(q) => {
                    self.quotas.insert(q.target, q.quota);
                }
            }
            offset += size as u64;
        }
        if sb.version == PERSIST_VERSION_V1 && !self.branches.is_empty() {
            log::warn!("volume load: v1 image carries branch records");
        }
        Ok(())
    }

    fn scan_refs(&mut self) -> GeoResult<()> {
        let used = self.ref_region.used();
        let mut offset = 0;
        while offset < used {
            let tail = self.ref_region.tail_from(offset).ok_or(GeoError::Corrupt)?;
            let rec = RefRecord::decode(tail.get(..REF_RECORD_SIZE).ok_or(GeoError::Corrupt)?)?;
            let view = self.views.get(&rec.view).ok_or(GeoError::Corrupt)?;
            self.usage.entry(view.branch).or_default().refs += 1;
            self.total_refs += 1;
            self.refs.push(RefEntry {
                path: rec.path.to_string(),
                path_hash: rec.path_hash,
                content: rec.content,
                view: rec.view,
                created: rec.created,
                hidden: rec.hidden,
                file_type: rec.file_type,
                permissions: rec.permissions,
                owner: rec.owner,
            });
            offset += REF_RECORD_SIZE as u64;
        }
        Ok(())
    }
}
