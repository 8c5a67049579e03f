//! Native x86_64 CPU access

use core::arch::x86_64::{__cpuid, _rdtsc};
use x86_64::registers::model_specific::Msr;

use crate::platform::{Cpu, CpuidResult};

/// The CPU the kernel is running on.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCpu;

impl Cpu for NativeCpu {
    #[inline]
    #[allow(unused_unsafe)]
    fn read_tsc(&self) -> u64 {
        // SAFETY: rdtsc has no side effects and is available on every
        // x86_64 CPU.
        unsafe { _rdtsc() }
    }

    unsafe fn write_msr(&self, msr: u32, value: u64) {
        // SAFETY: The caller guarantees that the register and value are
        // valid for this CPU.
        unsafe { Msr::new(msr).write(value) };
    }

    #[allow(unused_unsafe)]
    fn cpuid(&self, leaf: u32) -> CpuidResult {
        // SAFETY: cpuid is unprivileged and always present on x86_64.
        let r = unsafe { __cpuid(leaf) };
        CpuidResult {
            eax: r.eax,
            ebx: r.ebx,
            ecx: r.ecx,
            edx: r.edx,
        }
    }
}
