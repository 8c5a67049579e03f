//! Software fallback backend
//!
//! Always initializes and never accelerates anything: every drawing call
//! answers [`GpuError::NotAccelerated`] so the caller renders on the CPU.

use super::backend::{BackendKind, Color, GpuBackend, GpuError, GpuResult, GpuStats, Point, Rect};

/// The backend pre-registered by [`super::GpuHal::init`].
pub static SOFTWARE_BACKEND: SoftwareBackend = SoftwareBackend;

/// CPU rendering placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareBackend;

impl SoftwareBackend {
    /// Priority of the software floor.
    pub const PRIORITY: i32 = 0;
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn init(&self) -> GpuResult<()> {
        Ok(())
    }

    fn available(&self) -> bool {
        true
    }

    fn fill_rect(&self, _rect: Rect, _color: Color) -> GpuResult<()> {
        Err(GpuError::NotAccelerated)
    }

    fn clear(&self, _color: Color) -> GpuResult<()> {
        Err(GpuError::NotAccelerated)
    }

    fn copy_region(&self, _src: Rect, _dst: Point) -> GpuResult<()> {
        Err(GpuError::NotAccelerated)
    }

    fn flip(&self) -> GpuResult<()> {
        Err(GpuError::NotAccelerated)
    }

    fn sync(&self) -> GpuResult<()> {
        Ok(())
    }

    fn wait(&self) -> GpuResult<()> {
        Ok(())
    }

    fn pending_ops(&self) -> u32 {
        0
    }

    fn stats(&self) -> GpuStats {
        GpuStats::default()
    }
}
