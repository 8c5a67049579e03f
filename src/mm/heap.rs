//! Kernel Heap Allocator
//!
//! Uses `linked_list_allocator` for heap management. GeoFS indices and
//! the `alloc` collections used throughout the core live here.
//!
//! # Memory Layout
//! The kernel hands a region of mapped memory to [`KernelHeap::init`].
//! With the `global-heap` feature a static arena is installed as the
//! global allocator and [`init_heap`] wires it up at boot.
//!
//! # Considerations
//! - Heap is initialized once during boot
//! - Exhaustion returns null; the default alloc error handler panics
//! - linked_list_allocator provides bounds checking

use core::alloc::{GlobalAlloc, Layout};
use linked_list_allocator::LockedHeap;

/// A spinlocked linked-list heap.
pub struct KernelHeap {
    inner: LockedHeap,
}

impl KernelHeap {
    /// An empty heap; every allocation fails until [`KernelHeap::init`].
    pub const fn empty() -> Self {
        Self {
            inner: LockedHeap::empty(),
        }
    }

    /// Give the heap its memory.
    ///
    /// # Safety
    /// `start..start + size` must be valid, writable, unused memory that
    /// outlives the heap. Must be called at most once.
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        // SAFETY: Forwarded from the caller.
        unsafe { self.inner.lock().init(start, size) };
    }

    /// Bytes currently allocated.
    pub fn used(&self) -> usize {
        self.inner.lock().used()
    }

    /// Bytes still available.
    pub fn free(&self) -> usize {
        self.inner.lock().free()
    }

    /// Total heap size.
    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }
}

// SAFETY: Delegates to `LockedHeap`, which upholds the `GlobalAlloc`
// contract.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: Forwarded from the caller.
        unsafe { self.inner.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: Forwarded from the caller.
        unsafe { self.inner.dealloc(ptr, layout) }
    }
}

#[cfg(all(feature = "global-heap", not(test)))]
mod global {
    use super::KernelHeap;

    /// Global heap allocator instance
    #[global_allocator]
    static ALLOCATOR: KernelHeap = KernelHeap::empty();

    /// Heap size (8 MiB: GeoFS indices plus region segments on early boot)
    const HEAP_SIZE: usize = 8 * 1024 * 1024;

    /// Static heap memory region
    static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

    /// Initialize the kernel heap
    ///
    /// Must be called exactly once during kernel initialization, before
    /// any heap allocations are made.
    pub fn init_heap() {
        // SAFETY: HEAP_MEMORY is a static array touched by nothing else,
        // and boot calls this exactly once.
        unsafe {
            let heap_start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
            ALLOCATOR.init(heap_start, HEAP_SIZE);
        }
    }

    /// Get the size of the kernel heap
    pub fn heap_size() -> usize {
        HEAP_SIZE
    }
}

#[cfg(all(feature = "global-heap", not(test)))]
pub use global::{heap_size, init_heap};
