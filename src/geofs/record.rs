//! On-disk record formats
//!
//! Every record GeoFS appends to a region, plus the persisted superblock.
//! All integers are little-endian and fields are packed without padding.
//!
//! # Record Layouts
//! ```text
//! content header (64)  magic flags size hash[32] original reserved[8]
//!                      + payload (`size` stored bytes)
//! ref record    (608)  magic flags path_hash[32] content[32] view created
//!                      path_len type perms owner pad path[512]
//! view v1        (96)  magic flags id parent created label[64]
//! view v2       (104)  magic flags id parent branch created label[64]
//! branch        (104)  magic flags id base head created name[64]
//! quota          (48)  magic flags target max_bytes max_refs max_views created
//! ```

use super::access::Permissions;
use super::error::{GeoError, GeoResult};
use super::hash::{ContentHash, HASH_SIZE};
use super::path::MAX_PATH;
use super::types::{BranchId, FileType, Quota, QuotaTarget, ViewId};

/// "CONT"
pub const CONTENT_MAGIC: u32 = 0x544E_4F43;
/// "GREF"
pub const REF_MAGIC: u32 = 0x4645_5247;
/// "VIEW" (legacy, no branch)
pub const VIEW_MAGIC: u32 = 0x5745_4956;
/// "VIW2"
pub const VIEW2_MAGIC: u32 = 0x3257_4956;
/// "BRCH"
pub const BRANCH_MAGIC: u32 = 0x4843_5242;
/// "QOTA"
pub const QUOTA_MAGIC: u32 = 0x4154_4F51;

pub const CONTENT_HEADER_SIZE: usize = 64;
pub const REF_RECORD_SIZE: usize = 96 + MAX_PATH;
pub const VIEW_V1_SIZE: usize = 32 + LABEL_SIZE;
pub const VIEW_V2_SIZE: usize = 40 + LABEL_SIZE;
pub const BRANCH_RECORD_SIZE: usize = 40 + LABEL_SIZE;
pub const QUOTA_RECORD_SIZE: usize = 48;

/// Size of the label and branch-name fields (NUL-terminated).
pub const LABEL_SIZE: usize = 64;

/// Content header flag: the payload is an LZ4 block.
pub const CONTENT_FLAG_COMPRESSED: u32 = 1 << 0;

/// Ref record flag: the reference hides its path.
pub const REF_FLAG_HIDDEN: u32 = 1 << 0;

/// Sequential little-endian writer over a fixed buffer.
pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes(&[v])
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn hash(&mut self, h: &ContentHash) -> &mut Self {
        self.bytes(h.as_bytes())
    }

    /// Text into a fixed field, NUL-padded, truncated to leave a terminator.
    pub fn text(&mut self, s: &str, field: usize) -> &mut Self {
        let s = truncate(s, field - 1);
        self.bytes(s.as_bytes());
        self.zeros(field - s.len())
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.buf[self.pos..self.pos + n].fill(0);
        self.pos += n;
        self
    }
}

/// Sequential little-endian reader; running past the end is corruption.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn bytes(&mut self, n: usize) -> GeoResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(GeoError::Corrupt)?;
        let out = self.buf.get(self.pos..end).ok_or(GeoError::Corrupt)?;
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> GeoResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> GeoResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> GeoResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> GeoResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> GeoResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn hash(&mut self) -> GeoResult<ContentHash> {
        Ok(ContentHash::from_bytes(self.array::<HASH_SIZE>()?))
    }

    /// NUL-terminated UTF-8 text from a fixed field.
    pub fn text(&mut self, field: usize) -> GeoResult<&'a str> {
        let raw = self.bytes(field)?;
        let len = raw.iter().position(|&b| b == 0).unwrap_or(field);
        core::str::from_utf8(&raw[..len]).map_err(|_| GeoError::Corrupt)
    }

    pub fn skip(&mut self, n: usize) -> GeoResult<()> {
        self.bytes(n).map(|_| ())
    }
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Magic number at the start of `bytes`, if there are four bytes.
pub fn peek_magic(bytes: &[u8]) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

/// Header in front of every content payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHeader {
    pub flags: u32,
    /// Payload bytes in the region.
    pub size: u64,
    pub hash: ContentHash,
    /// Length before compression; 0 for uncompressed payloads.
    pub original_size: u64,
}

impl ContentHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & CONTENT_FLAG_COMPRESSED != 0
    }

    /// Length of the payload once read back.
    pub fn logical_size(&self) -> u64 {
        if self.is_compressed() {
            self.original_size
        } else {
            self.size
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        Writer::new(out)
            .u32(CONTENT_MAGIC)
            .u32(self.flags)
            .u64(self.size)
            .hash(&self.hash)
            .u64(self.original_size)
            .zeros(8);
    }

    pub fn decode(bytes: &[u8]) -> GeoResult<Self> {
        let mut r = Reader::new(bytes);
        if r.u32()? != CONTENT_MAGIC {
            return Err(GeoError::Corrupt);
        }
        let flags = r.u32()?;
        let size = r.u64()?;
        let hash = r.hash()?;
        let original_size = r.u64()?;
        r.skip(8)?;
        Ok(Self {
            flags,
            size,
            hash,
            original_size,
        })
    }
}

/// A reference as stored in the ref region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefRecord<'a> {
    pub hidden: bool,
    pub path_hash: ContentHash,
    pub content: ContentHash,
    pub view: ViewId,
    pub created: u64,
    pub file_type: FileType,
    pub permissions: Permissions,
    pub owner: u16,
    pub path: &'a str,
}

impl RefRecord<'_> {
    pub fn encode(&self, out: &mut [u8]) {
        let flags = if self.hidden { REF_FLAG_HIDDEN } else { 0 };
        Writer::new(out)
            .u32(REF_MAGIC)
            .u32(flags)
            .hash(&self.path_hash)
            .hash(&self.content)
            .u64(self.view.0)
            .u64(self.created)
            .u16(self.path.len() as u16)
            .u8(self.file_type as u8)
            .u8(self.permissions.bits())
            .u16(self.owner)
            .u16(0)
            .text(self.path, MAX_PATH);
    }
}

impl<'a> RefRecord<'a> {
    pub fn decode(bytes: &'a [u8]) -> GeoResult<Self> {
        let mut r = Reader::new(bytes);
        if r.u32()? != REF_MAGIC {
            return Err(GeoError::Corrupt);
        }
        let flags = r.u32()?;
        let path_hash = r.hash()?;
        let content = r.hash()?;
        let view = ViewId(r.u64()?);
        let created = r.u64()?;
        let path_len = r.u16()? as usize;
        let file_type = FileType::from_raw(r.u8()?).ok_or(GeoError::Corrupt)?;
        let permissions = Permissions::from_bits_truncate(r.u8()?);
        let owner = r.u16()?;
        r.skip(2)?;
        let path = r.text(MAX_PATH)?;
        if path.len() != path_len {
            return Err(GeoError::Corrupt);
        }
        Ok(Self {
            hidden: flags & REF_FLAG_HIDDEN != 0,
            path_hash,
            content,
            view,
            created,
            file_type,
            permissions,
            owner,
            path,
        })
    }
}

/// A view record; `branch` is `None` for legacy v1 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRecord<'a> {
    pub id: ViewId,
    pub parent: ViewId,
    pub branch: Option<BranchId>,
    pub created: u64,
    pub label: &'a str,
}

impl ViewRecord<'_> {
    /// Encoded size of this record.
    pub fn size(&self) -> usize {
        if self.branch.is_some() {
            VIEW_V2_SIZE
        } else {
            VIEW_V1_SIZE
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        let mut w = Writer::new(out);
        match self.branch {
            Some(branch) => {
                w.u32(VIEW2_MAGIC).u32(0).u64(self.id.0).u64(self.parent.0).u64(branch.0);
            }
            None => {
                w.u32(VIEW_MAGIC).u32(0).u64(self.id.0).u64(self.parent.0);
            }
        }
        w.u64(self.created).text(self.label, LABEL_SIZE);
    }
}

/// A branch record; the newest record for an id wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchRecord<'a> {
    pub id: BranchId,
    pub base: ViewId,
    pub head: ViewId,
    pub created: u64,
    pub name: &'a str,
}

impl BranchRecord<'_> {
    pub fn encode(&self, out: &mut [u8]) {
        Writer::new(out)
            .u32(BRANCH_MAGIC)
            .u32(0)
            .u64(self.id.0)
            .u64(self.base.0)
            .u64(self.head.0)
            .u64(self.created)
            .text(self.name, LABEL_SIZE);
    }
}

/// A quota record; the newest record for a target wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRecord {
    pub target: QuotaTarget,
    pub quota: Quota,
    pub created: u64,
}

impl QuotaRecord {
    pub fn encode(&self, out: &mut [u8]) {
        Writer::new(out)
            .u32(QUOTA_MAGIC)
            .u32(0)
            .u64(self.target.to_raw())
            .u64(self.quota.max_content_bytes)
            .u64(self.quota.max_refs)
            .u64(self.quota.max_views)
            .u64(self.created);
    }
}

/// Any record found in the view region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewRegionRecord<'a> {
    View(ViewRecord<'a>),
    Branch(BranchRecord<'a>),
    Quota(QuotaRecord),
}

impl<'a> ViewRegionRecord<'a> {
    /// Decode the record at the start of `bytes`.
    ///
    /// Returns the record and its encoded size.
    pub fn decode(bytes: &'a [u8]) -> GeoResult<(Self, usize)> {
        let mut r = Reader::new(bytes);
        let magic = r.u32()?;
        let _flags = r.u32()?;
        match magic {
            VIEW_MAGIC | VIEW2_MAGIC => {
                let id = ViewId(r.u64()?);
                let parent = ViewId(r.u64()?);
                let branch = if magic == VIEW2_MAGIC {
                    Some(BranchId(r.u64()?))
                } else {
                    None
                };
                let created = r.u64()?;
                let label = r.text(LABEL_SIZE)?;
                let rec = ViewRecord { id, parent, branch, created, label };
                Ok((ViewRegionRecord::View(rec), rec.size()))
            }
            BRANCH_MAGIC => {
                let id = BranchId(r.u64()?);
                let base = ViewId(r.u64()?);
                let head = ViewId(r.u64()?);
                let created = r.u64()?;
                let name = r.text(LABEL_SIZE)?;
                let rec = BranchRecord { id, base, head, created, name };
                Ok((ViewRegionRecord::Branch(rec), BRANCH_RECORD_SIZE))
            }
            QUOTA_MAGIC => {
                let target = QuotaTarget::from_raw(r.u64()?);
                let quota = Quota {
                    max_content_bytes: r.u64()?,
                    max_refs: r.u64()?,
                    max_views: r.u64()?,
                };
                let created = r.u64()?;
                let rec = QuotaRecord { target, quota, created };
                Ok((ViewRegionRecord::Quota(rec), QUOTA_RECORD_SIZE))
            }
            _ => Err(GeoError::Corrupt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(REF_RECORD_SIZE, 608);
        assert_eq!(VIEW_V1_SIZE, 96);
        assert_eq!(VIEW_V2_SIZE, 104);
        assert_eq!(BRANCH_RECORD_SIZE, 104);
    }

    #[test]
    fn test_content_header_layout() {
        let hash = ContentHash::of(b"ABC");
        let mut buf = [0xFFu8; CONTENT_HEADER_SIZE];
        ContentHeader {
            flags: 0,
            size: 3,
            hash,
            original_size: 0,
        }
        .encode(&mut buf);
        assert_eq!(&buf[0..4], b"CONT");
        assert_eq!(&buf[8..16], &3u64.to_le_bytes());
        assert_eq!(&buf[16..48], hash.as_bytes());
        assert!(buf[48..].iter().all(|&b| b == 0));
        let header = ContentHeader::decode(&buf).unwrap();
        assert_eq!((header.size, header.logical_size()), (3, 3));
    }

    #[test]
    fn test_compressed_header_keeps_original_size() {
        let header = ContentHeader {
            flags: CONTENT_FLAG_COMPRESSED,
            size: 20,
            hash: ContentHash::of(b"x"),
            original_size: 4096,
        };
        let mut buf = [0u8; CONTENT_HEADER_SIZE];
        header.encode(&mut buf);
        assert_eq!(&buf[4..8], &1u32.to_le_bytes());
        assert_eq!(&buf[48..56], &4096u64.to_le_bytes());
        assert!(buf[56..].iter().all(|&b| b == 0));

        let back = ContentHeader::decode(&buf).unwrap();
        assert!(back.is_compressed());
        assert_eq!((back.size, back.logical_size()), (20, 4096));
    }

    #[test]
    fn test_ref_record_fields() {
        let rec = RefRecord {
            hidden: true,
            path_hash: ContentHash::of(b"/a"),
            content: ContentHash::ZERO,
            view: ViewId(7),
            created: 99,
            file_type: FileType::Directory,
            permissions: Permissions::READ,
            owner: 1000,
            path: "/a",
        };
        let mut buf = [0u8; REF_RECORD_SIZE];
        rec.encode(&mut buf);
        assert_eq!(&buf[0..4], b"GREF");
        assert_eq!(buf[4], 1);
        assert_eq!(&buf[88..90], &2u16.to_le_bytes());
        assert_eq!(buf[90], 1);
        assert_eq!(&buf[96..98], b"/a");
        assert_eq!(RefRecord::decode(&buf).unwrap(), rec);
    }

    #[test]
    fn test_ref_record_length_mismatch_is_corrupt() {
        let rec = RefRecord {
            hidden: false,
            path_hash: ContentHash::ZERO,
            content: ContentHash::ZERO,
            view: ViewId(0),
            created: 0,
            file_type: FileType::File,
            permissions: Permissions::DEFAULT,
            owner: 0,
            path: "/abc",
        };
        let mut buf = [0u8; REF_RECORD_SIZE];
        rec.encode(&mut buf);
        buf[88] = 9;
        assert_eq!(RefRecord::decode(&buf), Err(GeoError::Corrupt));
    }

    #[test]
    fn test_legacy_view_record() {
        let mut buf = [0u8; VIEW_V1_SIZE];
        let rec = ViewRecord {
            id: ViewId(1),
            parent: ViewId(0),
            branch: None,
            created: 5,
            label: "Genesis",
        };
        rec.encode(&mut buf);
        assert_eq!(&buf[0..4], b"VIEW");
        let (decoded, size) = ViewRegionRecord::decode(&buf).unwrap();
        assert_eq!(size, VIEW_V1_SIZE);
        assert_eq!(decoded, ViewRegionRecord::View(rec));
    }

    #[test]
    fn test_label_truncated_on_char_boundary() {
        let label = "é".repeat(40);
        let mut buf = [0u8; VIEW_V2_SIZE];
        ViewRecord { id: ViewId(1), parent: ViewId(0), branch: Some(BranchId(0)), created: 0, label: &label }
            .encode(&mut buf);
        let (decoded, _) = ViewRegionRecord::decode(&buf).unwrap();
        match decoded {
            ViewRegionRecord::View(v) => assert_eq!(v.label.len(), 62),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_unknown_magic_is_corrupt() {
        let buf = [0x11u8; 128];
        assert_eq!(ViewRegionRecord::decode(&buf), Err(GeoError::Corrupt));
    }
}
