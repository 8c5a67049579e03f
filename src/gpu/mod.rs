//! GPU hardware abstraction layer
//!
//! Independent 2D backends register with the HAL; [`GpuHal::select_best`]
//! tries them and activates the best one, and the drawing calls are
//! forwarded to it. A software backend is registered first and reports
//! [`GpuError::NotAccelerated`] for everything, which tells the caller to
//! render on the CPU.
//!
//! # Selection
//! - Inside a VM, physical GPU backends are demoted to priority -1 and
//!   are never initialized; nothing at or below that priority is tried
//! - Backends are tried from the highest priority down; ties keep
//!   registration order
//! - The first backend whose `init` succeeds and which reports itself
//!   available becomes active

mod backend;
mod software;

pub use backend::{BackendKind, Color, GpuBackend, GpuError, GpuResult, GpuStats, Point, Rect};
pub use software::{SoftwareBackend, SOFTWARE_BACKEND};

use spin::Mutex;

use crate::platform::Hypervisor;

/// Registry capacity.
pub const MAX_BACKENDS: usize = 8;

/// Priority given to physical GPUs when running virtualized.
pub const DEMOTED_PRIORITY: i32 = -1;

/// A registered backend and its effective priority.
#[derive(Clone, Copy)]
struct Registered {
    backend: &'static dyn GpuBackend,
    priority: i32,
}

/// Backend registry and dispatcher.
pub struct GpuHal {
    slots: [Option<Registered>; MAX_BACKENDS],
    count: usize,
    active: Option<usize>,
    fallbacks: u64,
}

impl GpuHal {
    /// An empty registry with nothing active.
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_BACKENDS],
            count: 0,
            active: None,
            fallbacks: 0,
        }
    }

    /// Reset the registry and install the software backend.
    ///
    /// The software backend is active until [`select_best`](Self::select_best)
    /// runs.
    pub fn init(&mut self) {
        *self = Self::new();
        // An empty registry always has room.
        let _ = self.register(&SOFTWARE_BACKEND);
        self.active = Some(0);
    }

    /// Add a backend at its own priority.
    pub fn register(&mut self, backend: &'static dyn GpuBackend) -> GpuResult<()> {
        if self.count >= MAX_BACKENDS {
            log::warn!("gpu: cannot register {}: registry full", backend.name());
            return Err(GpuError::RegistryFull);
        }
        self.slots[self.count] = Some(Registered {
            backend,
            priority: backend.priority(),
        });
        self.count += 1;
        log::info!("gpu: registered {} (priority {})", backend.name(), backend.priority());
        Ok(())
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Initialize the registered backends in turn and activate the best one.
    ///
    /// Returns the name of the backend now active, or `None` if every backend
    /// failed.
    pub fn select_best(&mut self, hv: &dyn Hypervisor) -> Option<&'static str> {
        let virtualized = hv.is_virtualized();
        if virtualized {
            for reg in self.slots[..self.count].iter_mut().flatten() {
                if reg.backend.kind().is_physical() && reg.priority != DEMOTED_PRIORITY {
                    log::info!("gpu: demoting {} inside VM", reg.backend.name());
                    reg.priority = DEMOTED_PRIORITY;
                }
            }
        }

        // Highest priority first, then registration order.
        let mut order = [0usize; MAX_BACKENDS];
        for (i, slot) in order.iter_mut().enumerate().take(self.count) {
            *slot = i;
        }
        let order = &mut order[..self.count];
        order.sort_unstable_by_key(|&i| (core::cmp::Reverse(self.priority_of(i)), i));

        self.active = None;
        for &i in order.iter() {
            let Some(reg) = self.slots[i] else { continue };
            if reg.priority <= DEMOTED_PRIORITY {
                log::debug!("gpu: skipping {} (priority {})", reg.backend.name(), reg.priority);
                continue;
            }
            match reg.backend.init() {
                Ok(()) if reg.backend.available() => {
                    self.active = Some(i);
                    break;
                }
                Ok(()) => log::debug!("gpu: {} initialized but unavailable", reg.backend.name()),
                Err(e) => log::debug!("gpu: {} init failed: {}", reg.backend.name(), e),
            }
        }

        match self.active() {
            Some(backend) => {
                log::info!("gpu: selected {} (virtualized: {})", backend.name(), virtualized);
                Some(backend.name())
            }
            None => {
                log::warn!("gpu: no backend available");
                None
            }
        }
    }

    fn priority_of(&self, index: usize) -> i32 {
        self.slots[index].map_or(i32::MIN, |r| r.priority)
    }

    /// The active backend, if any.
    pub fn active(&self) -> Option<&'static dyn GpuBackend> {
        self.active.and_then(|i| self.slots[i]).map(|r| r.backend)
    }

    /// Name of the active backend, or `"None"`.
    pub fn active_name(&self) -> &'static str {
        self.active().map_or("None", |b| b.name())
    }

    /// Effective priority of the active backend.
    pub fn active_priority(&self) -> Option<i32> {
        self.active.map(|i| self.priority_of(i))
    }

    /// Forward an operation, counting software fallbacks.
    fn dispatch(&mut self, op: impl FnOnce(&dyn GpuBackend) -> GpuResult<()>) -> GpuResult<()> {
        let result = match self.active() {
            Some(backend) => op(backend),
            None => Err(GpuError::NotAccelerated),
        };
        if result == Err(GpuError::NotAccelerated) {
            self.fallbacks += 1;
        }
        result
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) -> GpuResult<()> {
        self.dispatch(|b| b.fill_rect(rect, color))
    }

    pub fn clear(&mut self, color: Color) -> GpuResult<()> {
        self.dispatch(|b| b.clear(color))
    }

    pub fn copy_region(&mut self, src: Rect, dst: Point) -> GpuResult<()> {
        self.dispatch(|b| b.copy_region(src, dst))
    }

    pub fn flip(&mut self) -> GpuResult<()> {
        self.dispatch(|b| b.flip())
    }

    /// Change the display mode; backends without mode setting answer
    /// [`GpuError::Unsupported`].
    pub fn set_resolution(&mut self, width: u32, height: u32) -> GpuResult<()> {
        match self.active() {
            Some(backend) => backend.set_resolution(width, height),
            None => Err(GpuError::Unsupported),
        }
    }

    /// Submit queued work.
    pub fn sync(&self) -> GpuResult<()> {
        self.active().map_or(Ok(()), |b| b.sync())
    }

    /// Wait for the device to go idle.
    pub fn wait(&self) -> GpuResult<()> {
        self.active().map_or(Ok(()), |b| b.wait())
    }

    pub fn pending_ops(&self) -> u32 {
        self.active().map_or(0, |b| b.pending_ops())
    }

    /// Counters of the active backend plus the HAL's own fallbacks.
    pub fn stats(&self) -> GpuStats {
        let mut stats = self.active().map(|b| b.stats()).unwrap_or_default();
        stats.sw_fallbacks += self.fallbacks;
        stats
    }

    /// Log the registry and the active backend.
    pub fn dump_info(&self) {
        log::info!("GPU HAL: {} backend(s), active: {}", self.count, self.active_name());
        for (i, reg) in self.slots[..self.count].iter().flatten().enumerate() {
            let marker = if self.active == Some(i) { '*' } else { ' ' };
            log::info!(
                " {} {:<10} {:<8} priority {:>4}",
                marker,
                reg.backend.name(),
                reg.backend.kind().as_str(),
                reg.priority
            );
        }
        let s = self.stats();
        log::info!(
            "  fills {} clears {} copies {} flips {} fallbacks {} bytes {}",
            s.fills,
            s.clears,
            s.copies,
            s.flips,
            s.sw_fallbacks,
            s.bytes_transferred
        );
    }
}

impl Default for GpuHal {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel's HAL.
static HAL: Mutex<GpuHal> = Mutex::new(GpuHal::new());

/// Reset the global HAL and install the software backend.
pub fn init() {
    HAL.lock().init();
}

/// Register a backend with the global HAL.
pub fn register(backend: &'static dyn GpuBackend) -> GpuResult<()> {
    HAL.lock().register(backend)
}

/// Pick the global HAL's active backend.
pub fn select_best(hv: &dyn Hypervisor) -> Option<&'static str> {
    HAL.lock().select_best(hv)
}

pub fn active_name() -> &'static str {
    HAL.lock().active_name()
}

pub fn fill_rect(rect: Rect, color: Color) -> GpuResult<()> {
    HAL.lock().fill_rect(rect, color)
}

pub fn clear(color: Color) -> GpuResult<()> {
    HAL.lock().clear(color)
}

pub fn copy_region(src: Rect, dst: Point) -> GpuResult<()> {
    HAL.lock().copy_region(src, dst)
}

pub fn flip() -> GpuResult<()> {
    HAL.lock().flip()
}

pub fn set_resolution(width: u32, height: u32) -> GpuResult<()> {
    HAL.lock().set_resolution(width, height)
}

pub fn sync() -> GpuResult<()> {
    HAL.lock().sync()
}

pub fn wait() -> GpuResult<()> {
    HAL.lock().wait()
}

pub fn pending_ops() -> u32 {
    HAL.lock().pending_ops()
}

pub fn stats() -> GpuStats {
    HAL.lock().stats()
}

pub fn dump_info() {
    HAL.lock().dump_info()
}
