//! Page Pool
//!
//! Hands out contiguous runs of pages from a window of mapped kernel
//! memory using a bitmap allocator.
//!
//! # Design
//! - Each bit in the bitmap represents one 4KB page of the window
//! - Bit = 0: page is free
//! - Bit = 1: page is allocated
//! - Runs are found first-fit
//!
//! # Properties
//! - All allocated pages are zeroed before returning
//! - Double-free is detected and causes a panic
//! - Freeing a run outside the window causes a panic

use alloc::vec;
use alloc::vec::Vec;

use super::address::{VirtAddr, PAGE_SHIFT, PAGE_SIZE};
use super::{PageAllocator, PageRun};

const BITS_PER_WORD: usize = 64;

/// Bitmap page allocator over a fixed window.
pub struct PagePool {
    /// First byte of the window.
    base: VirtAddr,
    /// Pages in the window.
    total_pages: usize,
    /// Bitmap tracking allocated pages (1 = allocated, 0 = free).
    bitmap: Vec<u64>,
    /// Number of free pages remaining.
    free_count: usize,
}

impl PagePool {
    /// Create a pool managing `pages` pages starting at `base`.
    ///
    /// # Safety
    /// The window must be page-aligned, mapped writable, and used by
    /// nothing but this pool for as long as the pool or any run it handed
    /// out is alive.
    pub unsafe fn new(base: VirtAddr, pages: usize) -> Self {
        assert!(base.is_aligned(), "page pool window must be page-aligned");
        Self {
            base,
            total_pages: pages,
            bitmap: vec![0; pages.div_ceil(BITS_PER_WORD)],
            free_count: pages,
        }
    }

    /// Get the number of free pages remaining.
    pub fn available(&self) -> usize {
        self.free_count
    }

    /// Total pages under management.
    pub fn capacity(&self) -> usize {
        self.total_pages
    }

    /// Set a bit in the bitmap.
    #[inline]
    fn set_bit(&mut self, page: usize, allocated: bool) {
        let (word, bit) = (page / BITS_PER_WORD, page % BITS_PER_WORD);
        if allocated {
            self.bitmap[word] |= 1 << bit;
        } else {
            self.bitmap[word] &= !(1 << bit);
        }
    }

    /// Check if a page is allocated.
    #[inline]
    fn is_allocated(&self, page: usize) -> bool {
        if page >= self.total_pages {
            return true; // Out of range = allocated
        }
        (self.bitmap[page / BITS_PER_WORD] >> (page % BITS_PER_WORD)) & 1 == 1
    }

    /// First index of `count` consecutive free pages.
    fn find_run(&self, count: usize) -> Option<usize> {
        let mut start = 0;
        let mut len = 0;
        let mut page = 0;

        while page < self.total_pages {
            // Skip fully allocated words quickly
            if len == 0 && page % BITS_PER_WORD == 0 && self.bitmap[page / BITS_PER_WORD] == u64::MAX
            {
                page += BITS_PER_WORD;
                continue;
            }

            if self.is_allocated(page) {
                len = 0;
            } else {
                if len == 0 {
                    start = page;
                }
                len += 1;
                if len == count {
                    return Some(start);
                }
            }
            page += 1;
        }

        None
    }
}

// SAFETY: Runs come from the window handed to `PagePool::new`, are aligned,
// zeroed before return and never handed out twice while allocated.
unsafe impl PageAllocator for PagePool {
    fn alloc_pages(&mut self, count: usize) -> Option<PageRun> {
        if count == 0 || count > self.free_count {
            return None;
        }

        let first = self.find_run(count)?;
        for page in first..first + count {
            self.set_bit(page, true);
        }
        self.free_count -= count;

        let base = self.base.add(first << PAGE_SHIFT);
        // SAFETY: The pages were just marked allocated so we have exclusive
        // access, and the window is mapped writable per `new`'s contract.
        unsafe { core::ptr::write_bytes(base.as_mut_ptr::<u8>(), 0, count * PAGE_SIZE) };

        Some(PageRun::new(base, count))
    }

    fn free_pages(&mut self, run: PageRun) {
        if !run.base().is_aligned() {
            panic!("Attempted to free unaligned run: {:?}", run.base());
        }

        let offset = run
            .base()
            .as_usize()
            .checked_sub(self.base.as_usize())
            .unwrap_or(usize::MAX);
        let first = offset >> PAGE_SHIFT;
        if offset == usize::MAX || first + run.pages() > self.total_pages {
            panic!("Attempted to free run outside the pool: {:?}", run.base());
        }

        for page in first..first + run.pages() {
            if !self.is_allocated(page) {
                panic!("Double free detected for page {} of the pool", page);
            }
            self.set_bit(page, false);
        }
        self.free_count += run.pages();
    }
}
