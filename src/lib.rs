//! PhantomOS kernel core
//!
//! The hardest pieces of the PhantomOS x86_64 kernel, packaged as a
//! freestanding library that the boot crate links against.
//!
//! # Subsystems
//! - [`geofs`]: append-only, content-addressed filesystem with geological
//!   versioning (views, branches, merges), quotas, permissions and
//!   persistence to block storage
//! - [`gpu`]: priority-ranked GPU backend registry with a software floor
//!   and VM-aware demotion
//! - [`clock`]: KVM paravirtual clock read under a seqlock
//!
//! # Collaborators
//! Everything the core needs from the rest of the kernel is named in
//! [`platform`] (block devices, hypervisor detection, CPU access, ticks)
//! and [`mm`] (page runs and the kernel heap). Console output goes through
//! the `log` facade, backed by [`console`].
//!
//! # Architecture
//! - Target: x86_64, single CPU, cooperative scheduling
//! - Host builds (`cargo test`) link std so the unit tests can run

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod arch;
pub mod clock;
pub mod console;
pub mod drivers;
pub mod geofs;
pub mod gpu;
pub mod mm;
pub mod platform;

/// Core version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Panic handler for kernels that do not bring their own.
///
/// Reports the panic on the console and halts the CPU forever.
#[cfg(all(feature = "panic-handler", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    kprintln!();
    kprintln!("!!! KERNEL PANIC !!!");
    kprintln!("{}", info);
    arch::halt()
}
