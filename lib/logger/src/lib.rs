#![cfg_attr(not(test), no_std)]

pub mod console;

pub use console::*;
use crate_interface::call_interface;
use log::{Level, LevelFilter};

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }
    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        call_interface!(LogInterface::print_log(record));
    }
    fn flush(&self) {}
}

/// Backend for [`SimpleLogger`], registered by whatever crate owns the
/// actual output device (console, ring buffer, ...).
#[crate_interface::def_interface]
pub trait LogInterface: Send + Sync {
    fn print_log(record: &log::Record);
}

/// Installs `SimpleLogger` as the global logger and sets the max level
/// from the `LOG` environment variable captured at compile time.
pub fn init() {
    static LOGGER: SimpleLogger = SimpleLogger;
    log::set_logger(&LOGGER).ok();
    log::set_max_level(match option_env!("LOG") {
        Some("trace") => LevelFilter::Trace,
        Some("debug") => LevelFilter::Debug,
        Some("info") => LevelFilter::Info,
        Some("warn") => LevelFilter::Warn,
        Some("error") => LevelFilter::Error,
        _ => LevelFilter::Off,
    });
}

pub fn level2color(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 93,
        Level::Info => 36,
        Level::Debug => 32,
        Level::Trace => 90,
    }
}

#[macro_export]
macro_rules! lprint {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console_print(format_args!($fmt $(, $($arg)+)?))
    }
}

#[macro_export]
macro_rules! lprintln {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console_print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    }
}
