//! Kernel console and log backend
//!
//! The kernel's serial or framebuffer driver installs itself here as the
//! console sink. Everything in the core reports through the `log` facade,
//! which [`KernelLogger`] forwards to that sink, and the `kprint!` /
//! `kprintln!` macros write to it directly.
//!
//! # Design
//! - The sink is a `&'static mut dyn fmt::Write` behind a spinlock
//! - No sink installed: output is silently dropped
//! - Log lines look like `[INFO  phantom_core::geofs] message`

use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Destination for console output.
pub type Sink = dyn Write + Send;

/// Global console sink protected by spinlock.
pub static CONSOLE: Mutex<Option<&'static mut Sink>> = Mutex::new(None);

/// Install the console sink, replacing any previous one.
pub fn install_sink(sink: &'static mut Sink) {
    *CONSOLE.lock() = Some(sink);
}

/// Remove the console sink.
///
/// Returns the sink that was installed, if any.
pub fn take_sink() -> Option<&'static mut Sink> {
    CONSOLE.lock().take()
}

/// Write formatted output to the console sink.
///
/// Used by the print macros; prefer `kprint!` in kernel code.
pub fn write_fmt(args: fmt::Arguments<'_>) {
    if let Some(sink) = CONSOLE.lock().as_mut() {
        let _ = sink.write_fmt(args);
    }
}

/// Print macro for kernel output
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::console::write_fmt(format_args!($($arg)*));
    }};
}

/// Println macro for kernel output
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
        $crate::kprint!("\n");
    }};
}

/// `log` backend writing to the console sink.
pub struct KernelLogger {
    level: Mutex<LevelFilter>,
}

impl KernelLogger {
    const fn new() -> Self {
        Self {
            level: Mutex::new(LevelFilter::Info),
        }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= *self.level.lock()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        write_fmt(format_args!(
            "[{} {}] {}\n",
            tag,
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger::new();

/// Register the console logger with the `log` facade.
///
/// Safe to call more than once; later calls only change the level.
pub fn init(level: LevelFilter) {
    *LOGGER.level.lock() = level;
    // A second registration fails harmlessly.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
