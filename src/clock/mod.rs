//! KVM paravirtual clock
//!
//! The hypervisor keeps a small time record up to date in guest memory:
//! a TSC snapshot, the system time at that snapshot and a fixed-point
//! TSC-to-nanosecond scale. The guest publishes the record's physical
//! address once through an MSR and afterwards reads time without exiting
//! to the hypervisor.
//!
//! # Reading
//! The record is guarded by a version counter that the hypervisor makes
//! odd while it updates the fields. A read samples the version, reads the
//! fields and the TSC, and retries unless the version was even and did not
//! change.

use core::fmt;
use core::hint::spin_loop;
use core::sync::atomic::{fence, AtomicI8, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::mm::PhysAddr;
use crate::platform::{Cpu, Hypervisor, HypervisorVendor};

/// CPUID leaf with the KVM feature bits (EAX).
pub const KVM_FEATURES_LEAF: u32 = 0x4000_0001;

/// Old-style clocksource, MSR [`MSR_KVM_SYSTEM_TIME`].
pub const KVM_FEATURE_CLOCKSOURCE: u32 = 1 << 0;

/// New-style clocksource, MSR [`MSR_KVM_SYSTEM_TIME_NEW`].
pub const KVM_FEATURE_CLOCKSOURCE2: u32 = 1 << 3;

pub const MSR_KVM_SYSTEM_TIME: u32 = 0x4b56_4d00;

pub const MSR_KVM_SYSTEM_TIME_NEW: u32 = 0x4b56_4d01;

/// Enable bit in the value written to the system-time MSR.
const ENABLE: u64 = 1;

/// Reasons the clock stays inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// Running on bare metal.
    NotVirtualized,
    /// Virtualized, but not under KVM.
    UnsupportedHypervisor,
    /// KVM without a clocksource feature.
    NoClocksource,
    /// The hypervisor never filled in the time record.
    NotPopulated,
    /// `init` was already successful.
    AlreadyActive,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::NotVirtualized => write!(f, "not running under a hypervisor"),
            ClockError::UnsupportedHypervisor => write!(f, "hypervisor has no supported paravirtual clock"),
            ClockError::NoClocksource => write!(f, "clocksource feature not offered"),
            ClockError::NotPopulated => write!(f, "time record not populated"),
            ClockError::AlreadyActive => write!(f, "clock already active"),
        }
    }
}

/// The shared time record, as laid out by the hypervisor.
#[repr(C)]
#[derive(Debug)]
pub struct PvClockTimeInfo {
    pub version: AtomicU32,
    _pad0: AtomicU32,
    pub tsc_timestamp: AtomicU64,
    pub system_time: AtomicU64,
    pub tsc_to_system_mul: AtomicU32,
    pub tsc_shift: AtomicI8,
    pub flags: AtomicU8,
    _pad1: [AtomicU8; 2],
}

const _: () = assert!(core::mem::size_of::<PvClockTimeInfo>() == 32);

impl PvClockTimeInfo {
    pub const fn new() -> Self {
        Self {
            version: AtomicU32::new(0),
            _pad0: AtomicU32::new(0),
            tsc_timestamp: AtomicU64::new(0),
            system_time: AtomicU64::new(0),
            tsc_to_system_mul: AtomicU32::new(0),
            tsc_shift: AtomicI8::new(0),
            flags: AtomicU8::new(0),
            _pad1: [AtomicU8::new(0), AtomicU8::new(0)],
        }
    }
}

impl Default for PvClockTimeInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// A page holding the time record, so its physical address is page aligned.
#[repr(C, align(4096))]
#[derive(Debug, Default)]
pub struct PvClockPage {
    info: PvClockTimeInfo,
}

impl PvClockPage {
    pub const fn new() -> Self {
        Self {
            info: PvClockTimeInfo::new(),
        }
    }

    #[inline]
    pub fn info(&self) -> &PvClockTimeInfo {
        &self.info
    }
}

/// Scale a TSC delta to nanoseconds.
///
/// The delta is shifted left (or right, for a negative shift) and then
/// multiplied by `mul` as a 32.32 fixed-point fraction.
#[inline]
pub fn scale_delta(delta: u64, mul: u32, shift: i8) -> u64 {
    let delta = if shift >= 0 {
        delta.checked_shl(shift as u32).unwrap_or(0)
    } else {
        delta.checked_shr(-(shift as i32) as u32).unwrap_or(0)
    };
    ((delta as u128 * mul as u128) >> 32) as u64
}

/// A paravirtual clock bound to one CPU and one time record.
pub struct PvClock<'a, C: Cpu> {
    cpu: C,
    page: &'a PvClockPage,
    /// The MSR the record was published through, once active.
    msr: Option<u32>,
}

impl<'a, C: Cpu> PvClock<'a, C> {
    /// An inactive clock.
    pub const fn new(cpu: C, page: &'a PvClockPage) -> Self {
        Self { cpu, page, msr: None }
    }

    /// Publish the time record to the hypervisor.
    ///
    /// `phys` is the physical address of `page`.
    pub fn init(&mut self, hv: &dyn Hypervisor, phys: PhysAddr) -> Result<(), ClockError> {
        let result = self.activate(hv, phys);
        match result {
            Ok(msr) => log::info!("pvclock: active via MSR {:#x}", msr),
            Err(e) => log::info!("pvclock: inactive: {}", e),
        }
        result.map(|_| ())
    }

    fn activate(&mut self, hv: &dyn Hypervisor, phys: PhysAddr) -> Result<u32, ClockError> {
        if self.msr.is_some() {
            return Err(ClockError::AlreadyActive);
        }
        if !hv.is_virtualized() {
            return Err(ClockError::NotVirtualized);
        }
        if hv.vendor() != HypervisorVendor::Kvm {
            return Err(ClockError::UnsupportedHypervisor);
        }
        debug_assert!(phys.is_aligned());

        let features = self.cpu.cpuid(KVM_FEATURES_LEAF).eax;
        let msr = if features & KVM_FEATURE_CLOCKSOURCE2 != 0 {
            MSR_KVM_SYSTEM_TIME_NEW
        } else if features & KVM_FEATURE_CLOCKSOURCE != 0 {
            MSR_KVM_SYSTEM_TIME
        } else {
            return Err(ClockError::NoClocksource);
        };

        // SAFETY: The record lives in `self.page`, which outlives the clock,
        // and `phys` is its physical address. The MSR was advertised by the
        // feature leaf above.
        unsafe { self.cpu.write_msr(msr, phys.as_u64() | ENABLE) };
        fence(Ordering::SeqCst);

        if self.page.info.tsc_to_system_mul.load(Ordering::Acquire) == 0 {
            // SAFETY: Writing zero clears the enable bit of the same MSR.
            unsafe { self.cpu.write_msr(msr, 0) };
            return Err(ClockError::NotPopulated);
        }

        self.msr = Some(msr);
        Ok(msr)
    }

    /// Whether `init` succeeded.
    #[inline]
    pub fn available(&self) -> bool {
        self.msr.is_some()
    }

    /// Current time in nanoseconds, or 0 while inactive.
    pub fn read_ns(&self) -> u64 {
        if self.msr.is_none() {
            return 0;
        }
        let info = &self.page.info;
        loop {
            let v0 = info.version.load(Ordering::Acquire);
            if v0 & 1 != 0 {
                spin_loop();
                continue;
            }

            let base = info.tsc_timestamp.load(Ordering::Relaxed);
            let system_time = info.system_time.load(Ordering::Relaxed);
            let mul = info.tsc_to_system_mul.load(Ordering::Relaxed);
            let shift = info.tsc_shift.load(Ordering::Relaxed);
            let tsc = self.cpu.read_tsc();

            fence(Ordering::Acquire);
            if info.version.load(Ordering::Relaxed) == v0 {
                let delta = tsc.wrapping_sub(base);
                return system_time.wrapping_add(scale_delta(delta, mul, shift));
            }
        }
    }

    /// Tell the hypervisor to stop updating the record.
    pub fn shutdown(&mut self) {
        if let Some(msr) = self.msr.take() {
            // SAFETY: Clearing the enable bit of an MSR this clock enabled.
            unsafe { self.cpu.write_msr(msr, 0) };
            log::debug!("pvclock: disabled");
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod native {
    use spin::Once;

    use super::{ClockError, PvClock, PvClockPage};
    use crate::arch::x86_64::NativeCpu;
    use crate::mm::{PhysAddr, VirtAddr};
    use crate::platform::Hypervisor;

    static CLOCK_PAGE: PvClockPage = PvClockPage::new();

    static CLOCK: Once<PvClock<'static, NativeCpu>> = Once::new();

    /// Bring up the kernel's paravirtual clock.
    ///
    /// `translate` maps the kernel-virtual address of the time record to its
    /// physical address.
    pub fn init(hv: &dyn Hypervisor, translate: fn(VirtAddr) -> PhysAddr) -> Result<(), ClockError> {
        if CLOCK.is_completed() {
            return Err(ClockError::AlreadyActive);
        }
        let phys = translate(VirtAddr::from_ptr(&CLOCK_PAGE as *const PvClockPage));
        let mut clock = PvClock::new(NativeCpu, &CLOCK_PAGE);
        clock.init(hv, phys)?;
        CLOCK.call_once(|| clock);
        Ok(())
    }

    /// Whether the kernel clock is active.
    pub fn available() -> bool {
        CLOCK.get().is_some_and(|c| c.available())
    }

    /// Kernel time in nanoseconds, or 0 without a paravirtual clock.
    pub fn read_ns() -> u64 {
        CLOCK.get().map_or(0, |c| c.read_ns())
    }
}

#[cfg(target_arch = "x86_64")]
pub use native::{available, init, read_ns};
