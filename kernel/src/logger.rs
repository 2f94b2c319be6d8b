//! Kernel logger.
//!
//! Routes the `log` crate's macros through the console, prefixing each
//! record with its target in the `[subsys]` style the boot messages use.
//! Errors and warnings carry their level; info lines stay terse.

use log::{Level, LevelFilter, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        match record.level() {
            Level::Info => crate::println!("[{}] {}", record.target(), record.args()),
            level => crate::println!("[{}] {}: {}", record.target(), level, record.args()),
        }
    }

    fn flush(&self) {}
}

/// Install the logger. Boot hart, once, after the console works.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
