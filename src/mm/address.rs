//! Address newtypes
//!
//! The core touches memory through two kinds of address: the kernel-virtual
//! addresses of page runs it reads and writes, and the physical address of
//! the paravirtual clock page, which only the hypervisor dereferences.
//! Keeping them as distinct types stops one being passed for the other.

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Offset bits inside a page
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// log2 of [`PAGE_SIZE`]
pub const PAGE_SHIFT: usize = 12;

/// Upper 16 bits of a higher-half x86_64 address.
const UPPER_HALF: usize = 0xFFFF_0000_0000_0000;

/// Pages needed to hold `bytes`.
#[inline]
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// A guest-physical address. Never dereferenced by the core.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Value as written into an MSR.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 as usize & PAGE_MASK == 0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

/// A kernel-virtual address, always canonical (bits 63..48 copy bit 47).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        if addr & (1 << 47) != 0 {
            Self(addr | UPPER_HALF)
        } else {
            Self(addr & !UPPER_HALF)
        }
    }

    /// Address a pointer refers to.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self::new(ptr as usize)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// `offset` bytes further on.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self::new(self.0.wrapping_add(offset))
    }

    /// # Safety
    /// The address must be mapped for as long as the pointer is used.
    #[inline]
    pub const unsafe fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// # Safety
    /// The address must be mapped writable and not aliased while the
    /// pointer is used.
    #[inline]
    pub const unsafe fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}
