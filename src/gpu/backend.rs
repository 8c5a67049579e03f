//! GPU backend interface
//!
//! A backend is a static object registered once with the HAL. All methods
//! take `&self`: backends keep their own state behind atomics or locks, so
//! the HAL can hold plain `&'static` references to them.

use core::fmt;

/// Pixel color, 0xAARRGGBB.
pub type Color = u32;

/// A rectangle in framebuffer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Pixel count.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A framebuffer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// What kind of device a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// CPU rendering; never accelerated.
    Software,
    /// Bochs/QEMU display adapter.
    Bochs,
    /// virtio-gpu.
    VirtIo,
    /// Intel integrated graphics.
    Intel,
    /// VMware SVGA II.
    VmWare,
}

impl BackendKind {
    /// Real hardware, as opposed to an emulated or paravirtual device.
    ///
    /// Inside a VM such a backend is usually a passthrough the guest
    /// cannot rely on, so it is demoted below everything else.
    #[inline]
    pub const fn is_physical(self) -> bool {
        matches!(self, BackendKind::Intel)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BackendKind::Software => "software",
            BackendKind::Bochs => "bochs",
            BackendKind::VirtIo => "virtio",
            BackendKind::Intel => "intel",
            BackendKind::VmWare => "vmware",
        }
    }
}

/// GPU operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuError {
    /// No acceleration: the caller renders in software.
    NotAccelerated,
    /// The backend does not implement the operation.
    Unsupported,
    /// Device initialization failed.
    InitFailed,
    /// The backend registry is full.
    RegistryFull,
    /// The device reported an error.
    Device,
}

impl GpuError {
    /// Kernel ABI error number.
    pub const fn code(self) -> i32 {
        match self {
            GpuError::NotAccelerated => -1,
            GpuError::Unsupported => -2,
            GpuError::InitFailed => -3,
            GpuError::RegistryFull => -4,
            GpuError::Device => -5,
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NotAccelerated => write!(f, "not accelerated"),
            GpuError::Unsupported => write!(f, "operation not supported"),
            GpuError::InitFailed => write!(f, "device initialization failed"),
            GpuError::RegistryFull => write!(f, "backend registry full"),
            GpuError::Device => write!(f, "device error"),
        }
    }
}

/// Result alias for GPU operations.
pub type GpuResult<T> = Result<T, GpuError>;

/// Operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuStats {
    pub fills: u64,
    pub clears: u64,
    pub copies: u64,
    /// Copies whose source and destination overlap on screen.
    pub screen_copies: u64,
    pub flips: u64,
    pub batched_ops: u64,
    /// Operations handed back to software rendering.
    pub sw_fallbacks: u64,
    pub bytes_transferred: u64,
}

/// A 2D acceleration backend.
pub trait GpuBackend: Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> BackendKind;

    /// Registration priority; higher wins.
    fn priority(&self) -> i32;

    /// Detect and bring up the device.
    fn init(&self) -> GpuResult<()>;

    /// Ready to accept operations (after a successful `init`).
    fn available(&self) -> bool;

    fn fill_rect(&self, rect: Rect, color: Color) -> GpuResult<()>;

    fn clear(&self, color: Color) -> GpuResult<()>;

    fn copy_region(&self, src: Rect, dst: Point) -> GpuResult<()>;

    /// Present the back buffer.
    fn flip(&self) -> GpuResult<()>;

    fn set_resolution(&self, _width: u32, _height: u32) -> GpuResult<()> {
        Err(GpuError::Unsupported)
    }

    /// Submit queued operations.
    fn sync(&self) -> GpuResult<()>;

    /// Block until the device is idle.
    fn wait(&self) -> GpuResult<()>;

    /// Operations queued but not yet complete.
    fn pending_ops(&self) -> u32;

    fn stats(&self) -> GpuStats;
}
