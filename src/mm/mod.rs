//! Memory management for the kernel core
//!
//! Provides:
//! - Address newtypes ([`PhysAddr`], [`VirtAddr`])
//! - The [`PageAllocator`] contract GeoFS regions grow through
//! - A bitmap [`PagePool`] over a window of mapped memory
//! - [`HeapPages`], page runs carved out of the global heap
//! - The kernel heap ([`KernelHeap`])
//!
//! # Principles
//! - Page runs are always zeroed and page-aligned
//! - Exhaustion is reported as `None`, never as a panic
//! - Unsafe code is minimal and documented

mod address;
mod frame;
mod heap;

use core::alloc::Layout;

pub use address::{pages_for, PhysAddr, VirtAddr, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
pub use frame::PagePool;
pub use heap::KernelHeap;

#[cfg(all(feature = "global-heap", not(test)))]
pub use heap::{heap_size, init_heap};

/// A run of contiguous, page-aligned pages.
#[derive(Debug, PartialEq, Eq)]
pub struct PageRun {
    base: VirtAddr,
    pages: usize,
}

impl PageRun {
    /// Describe `pages` pages starting at `base`.
    pub const fn new(base: VirtAddr, pages: usize) -> Self {
        Self { base, pages }
    }

    /// First byte of the run.
    #[inline]
    pub const fn base(&self) -> VirtAddr {
        self.base
    }

    /// Length in pages.
    #[inline]
    pub const fn pages(&self) -> usize {
        self.pages
    }

    /// Length in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    /// True for a zero-page run.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.pages == 0
    }
}

/// Source of page runs.
///
/// # Safety
/// Implementors must return runs that are page-aligned, mapped writable,
/// zero-filled and not aliased by any other live run until they are given
/// back through [`PageAllocator::free_pages`].
pub unsafe trait PageAllocator {
    /// Allocate `count` contiguous pages.
    fn alloc_pages(&mut self, count: usize) -> Option<PageRun>;

    /// Return a run obtained from this allocator.
    fn free_pages(&mut self, run: PageRun);
}

/// Page runs taken from the global heap.
///
/// Used on hosted builds and early boot, where the kernel heap is the only
/// memory source. An optional page limit lets callers model exhaustion.
#[derive(Debug, Default)]
pub struct HeapPages {
    in_use: usize,
    limit: Option<usize>,
}

impl HeapPages {
    /// Unlimited heap-backed pages.
    pub const fn new() -> Self {
        Self {
            in_use: 0,
            limit: None,
        }
    }

    /// Heap-backed pages, refusing to hand out more than `pages` at once.
    pub const fn with_limit(pages: usize) -> Self {
        Self {
            in_use: 0,
            limit: Some(pages),
        }
    }

    /// Pages currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    fn layout(pages: usize) -> Option<Layout> {
        Layout::from_size_align(pages.checked_mul(PAGE_SIZE)?, PAGE_SIZE).ok()
    }
}

// SAFETY: Every run is a fresh zeroed heap allocation with page alignment,
// released only through `free_pages` with the layout it was created with.
unsafe impl PageAllocator for HeapPages {
    fn alloc_pages(&mut self, count: usize) -> Option<PageRun> {
        if count == 0 {
            return None;
        }
        if let Some(limit) = self.limit {
            if self.in_use + count > limit {
                return None;
            }
        }

        let layout = Self::layout(count)?;
        // SAFETY: The layout has non-zero size.
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }

        self.in_use += count;
        Some(PageRun::new(VirtAddr::from_ptr(ptr), count))
    }

    fn free_pages(&mut self, run: PageRun) {
        let Some(layout) = Self::layout(run.pages()) else {
            return;
        };
        // SAFETY: The run was produced by `alloc_pages` with this layout.
        unsafe { alloc::alloc::dealloc(run.base().as_mut_ptr::<u8>(), layout) };
        self.in_use -= run.pages();
    }
}
