//! Installs the `log` crate's global logger over the console device,
//! replacing the teacher's ad hoc `printf!`/`Printer` (`printf.rs`) — this
//! crate uses `log::info!`/`log::warn!`/etc. directly (see `kalloc::init`),
//! so a real `log::Log` implementation is the ambient-stack equivalent
//! rather than a bespoke macro.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::console;

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = Writer;
        let _ = writeln!(out, "[{:<5} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

/// Adapter so `writeln!`/`write!` can target the console's unbuffered path
/// without needing the console's own lock held for line-buffered input.
struct Writer;

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        console::write_str_unbuffered(s).map_err(|_| core::fmt::Error)
    }
}

static LOGGER: KernelLogger = KernelLogger;

pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Info))
        .expect("log_setup::init called more than once");
}
