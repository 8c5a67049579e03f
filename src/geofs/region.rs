//! Append-only RAM regions
//!
//! A region is a chain of page-run segments. Records are appended to the
//! tail segment; when it cannot hold the next record a new segment is
//! allocated. Records never straddle segments, and nothing is ever
//! rewritten.
//!
//! # Offsets
//! Record offsets are logical: the bytes used by all earlier segments plus
//! the offset inside the segment. Serializing the used bytes of each
//! segment back to back therefore reproduces the same offsets, which is
//! what the persisted format relies on.

use alloc::vec::Vec;

use crate::mm::{pages_for, PageAllocator, PageRun};

use super::error::{GeoError, GeoResult};

/// Smallest growth step in pages.
pub const MIN_GROWTH_PAGES: usize = 16;

struct Segment {
    run: PageRun,
    /// Logical offset of the first byte.
    start: u64,
    used: usize,
}

impl Segment {
    fn free(&self) -> usize {
        self.run.len() - self.used
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: The run came from a `PageAllocator`, which guarantees it
        // is mapped, zeroed and exclusively ours until released; `used`
        // never exceeds its length.
        unsafe { core::slice::from_raw_parts(self.run.base().as_ptr::<u8>(), self.used) }
    }

    fn tail_mut(&mut self, len: usize) -> &mut [u8] {
        debug_assert!(len <= self.free());
        // SAFETY: As in `bytes`; the range lies past `used`, so no shared
        // slice handed out earlier overlaps it.
        unsafe {
            core::slice::from_raw_parts_mut(self.run.base().as_mut_ptr::<u8>().add(self.used), len)
        }
    }
}

/// An append-only byte region made of page-run segments.
pub struct Region {
    segments: Vec<Segment>,
    used: u64,
    capacity: usize,
}

impl Region {
    /// Create a region with one segment of `pages` pages.
    pub fn new<A: PageAllocator>(alloc: &mut A, pages: usize) -> GeoResult<Self> {
        let run = alloc.alloc_pages(pages.max(1)).ok_or(GeoError::OutOfMemory)?;
        let capacity = run.len();
        Ok(Self {
            segments: alloc::vec![Segment { run, start: 0, used: 0 }],
            used: 0,
            capacity,
        })
    }

    /// Logical bytes used.
    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Bytes of page memory held.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of segments in the chain.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Make sure the tail segment can take `len` contiguous bytes.
    ///
    /// Growing allocates memory but changes no visible state.
    pub fn reserve<A: PageAllocator>(&mut self, alloc: &mut A, len: usize) -> GeoResult<()> {
        if self.segments.last().is_some_and(|tail| tail.free() >= len) {
            return Ok(());
        }

        let pages = pages_for(len).max(MIN_GROWTH_PAGES);
        let run = alloc.alloc_pages(pages).ok_or(GeoError::OutOfMemory)?;
        log::debug!("region grew by {} pages ({} segments)", pages, self.segments.len() + 1);
        self.capacity += run.len();
        self.segments.push(Segment {
            run,
            start: self.used,
            used: 0,
        });
        Ok(())
    }

    /// Append a `len`-byte record written by `fill`.
    ///
    /// Returns the record's logical offset.
    pub fn append_with<A: PageAllocator>(
        &mut self,
        alloc: &mut A,
        len: usize,
        fill: impl FnOnce(&mut [u8]),
    ) -> GeoResult<u64> {
        self.reserve(alloc, len)?;
        let offset = self.used;
        let tail = self.segments.last_mut().ok_or(GeoError::OutOfMemory)?;
        fill(tail.tail_mut(len));
        tail.used += len;
        self.used += len as u64;
        Ok(offset)
    }

    /// Append raw bytes. Returns their logical offset.
    pub fn append<A: PageAllocator>(&mut self, alloc: &mut A, data: &[u8]) -> GeoResult<u64> {
        self.append_with(alloc, data.len(), |dst| dst.copy_from_slice(data))
    }

    /// `len` bytes at logical `offset`, if they lie inside one record area.
    pub fn get(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let idx = match self.segments.binary_search_by(|s| s.start.cmp(&offset)) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        // Empty segments share a start with their successor; walk to the one holding data.
        let seg = self.segments[idx..]
            .iter()
            .take_while(|s| s.start == self.segments[idx].start)
            .find(|s| s.used > 0)
            .unwrap_or(&self.segments[idx]);
        let local = (offset - seg.start) as usize;
        seg.bytes().get(local..local.checked_add(len)?)
    }

    /// Everything from `offset` to the end of its segment.
    pub fn tail_from(&self, offset: u64) -> Option<&[u8]> {
        let seg = self
            .segments
            .iter()
            .rev()
            .find(|s| s.start <= offset && offset < s.start + s.used as u64)?;
        Some(&seg.bytes()[(offset - seg.start) as usize..])
    }

    /// Used bytes of each segment in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(Segment::bytes).filter(|b| !b.is_empty())
    }

    /// Give every segment back to the allocator, leaving the region empty.
    pub fn release<A: PageAllocator>(&mut self, alloc: &mut A) {
        for seg in self.segments.drain(..) {
            alloc.free_pages(seg.run);
        }
        self.used = 0;
        self.capacity = 0;
    }
}
