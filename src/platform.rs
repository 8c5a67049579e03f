//! External collaborators
//!
//! The core does not drive hardware itself. Block storage, hypervisor
//! detection and privileged CPU instructions are provided by the rest of
//! the kernel through the traits in this module; [`crate::arch`] carries
//! the native x86_64 implementations and tests use mocks.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Once;

/// Size of one block-device sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// One sector worth of bytes.
pub type Sector = [u8; SECTOR_SIZE];

/// Failure reported by a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The drive id does not name an attached device.
    NoDevice,
    /// Sector beyond the end of the device.
    OutOfRange,
    /// The device reported an error while transferring.
    Device,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::NoDevice => write!(f, "no such drive"),
            IoError::OutOfRange => write!(f, "sector out of range"),
            IoError::Device => write!(f, "device error"),
        }
    }
}

/// Synchronous 512-byte sector I/O.
///
/// Calls block until the transfer completes.
pub trait BlockDevice {
    /// Read sector `lba` of `drive` into `buf`.
    fn read_sector(&mut self, drive: u8, lba: u64, buf: &mut Sector) -> Result<(), IoError>;

    /// Write `buf` to sector `lba` of `drive`.
    fn write_sector(&mut self, drive: u8, lba: u64, buf: &Sector) -> Result<(), IoError>;

    /// Flush any write cache.
    fn flush(&mut self, _drive: u8) -> Result<(), IoError> {
        Ok(())
    }
}

/// Hypervisor the kernel is running under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypervisorVendor {
    /// No hypervisor: real hardware.
    BareMetal,
    /// KVM (and KVM-compatible signatures).
    Kvm,
    /// VMware.
    Vmware,
    /// Microsoft Hyper-V.
    HyperV,
    /// Xen.
    Xen,
    /// Virtualized, but the signature is not recognized.
    Unknown,
}

/// Hypervisor detection results.
pub trait Hypervisor {
    /// True when running inside a virtual machine.
    fn is_virtualized(&self) -> bool;

    /// Which hypervisor, when virtualized.
    fn vendor(&self) -> HypervisorVendor;
}

/// Register values returned by `cpuid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Privileged CPU access needed by the paravirtual clock.
pub trait Cpu {
    /// Read the free-running timestamp counter.
    fn read_tsc(&self) -> u64;

    /// Write a model-specific register.
    ///
    /// # Safety
    /// Writing an MSR changes machine state. The caller must pass a
    /// register and value that are valid for the running CPU, and any
    /// memory the value points the CPU or hypervisor at must stay valid.
    unsafe fn write_msr(&self, msr: u32, value: u64);

    /// Execute `cpuid` for `leaf` (sub-leaf 0).
    fn cpuid(&self, leaf: u32) -> CpuidResult;
}

/// Monotonic tick source supplied by the timer driver.
static TICK_SOURCE: Once<fn() -> u64> = Once::new();

/// Fallback counter used before a tick source is installed.
static FALLBACK_TICKS: AtomicU64 = AtomicU64::new(0);

/// Install the kernel's tick counter.
///
/// Only the first installation takes effect.
pub fn set_tick_source(source: fn() -> u64) {
    TICK_SOURCE.call_once(|| source);
}

/// Current monotonic tick count.
///
/// Without an installed source every call returns the next value of an
/// internal counter, which keeps timestamps ordered.
pub fn ticks() -> u64 {
    match TICK_SOURCE.get() {
        Some(source) => source(),
        None => FALLBACK_TICKS.fetch_add(1, Ordering::Relaxed),
    }
}
