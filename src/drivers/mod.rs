//! Device drivers carried by the kernel core
//!
//! Real hardware drivers live outside the core and reach it through
//! [`crate::platform::BlockDevice`]. The core carries one driver of its
//! own, a RAM disk, used for scratch volumes and in tests.

pub mod ramdisk;

pub use ramdisk::RamDisk;
