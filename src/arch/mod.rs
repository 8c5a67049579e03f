//! Architecture support
//!
//! Hypervisor detection works against any [`Cpu`] so it can be exercised
//! with a mock. The native x86_64 CPU lives in [`x86_64`] and is only
//! compiled for that target.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

use crate::platform::{Cpu, Hypervisor, HypervisorVendor};

/// CPUID leaf 1, ECX bit 31: "hypervisor present".
const HYPERVISOR_PRESENT: u32 = 1 << 31;

/// CPUID leaf holding the hypervisor vendor signature.
pub const HYPERVISOR_LEAF: u32 = 0x4000_0000;

/// Result of probing CPUID for a hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HypervisorInfo {
    virtualized: bool,
    vendor: HypervisorVendor,
}

impl HypervisorInfo {
    /// Real hardware.
    pub const BARE_METAL: Self = Self {
        virtualized: false,
        vendor: HypervisorVendor::BareMetal,
    };

    /// Build a result directly (for kernels with their own detection).
    pub const fn new(virtualized: bool, vendor: HypervisorVendor) -> Self {
        Self { virtualized, vendor }
    }
}

impl Hypervisor for HypervisorInfo {
    fn is_virtualized(&self) -> bool {
        self.virtualized
    }

    fn vendor(&self) -> HypervisorVendor {
        self.vendor
    }
}

/// Map a 12-byte vendor signature (EBX, ECX, EDX of leaf 0x4000_0000).
fn vendor_from_signature(sig: &[u8; 12]) -> HypervisorVendor {
    match sig {
        b"KVMKVMKVM\0\0\0" => HypervisorVendor::Kvm,
        b"VMwareVMware" => HypervisorVendor::Vmware,
        b"Microsoft Hv" => HypervisorVendor::HyperV,
        b"XenVMMXenVMM" => HypervisorVendor::Xen,
        _ => HypervisorVendor::Unknown,
    }
}

/// Detect the hypervisor through CPUID.
pub fn detect_hypervisor(cpu: &dyn Cpu) -> HypervisorInfo {
    if cpu.cpuid(1).ecx & HYPERVISOR_PRESENT == 0 {
        return HypervisorInfo::BARE_METAL;
    }

    let leaf = cpu.cpuid(HYPERVISOR_LEAF);
    let mut sig = [0u8; 12];
    sig[0..4].copy_from_slice(&leaf.ebx.to_le_bytes());
    sig[4..8].copy_from_slice(&leaf.ecx.to_le_bytes());
    sig[8..12].copy_from_slice(&leaf.edx.to_le_bytes());

    HypervisorInfo::new(true, vendor_from_signature(&sig))
}

/// Halt the CPU forever.
pub fn halt() -> ! {
    loop {
        #[cfg(target_arch = "x86_64")]
        ::x86_64::instructions::hlt();
        #[cfg(not(target_arch = "x86_64"))]
        core::hint::spin_loop();
    }
}
