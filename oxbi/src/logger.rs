// SPDX-License-Identifier: MPL-2.0

//! Logging support.
//!
//! The logger prints records to the machine console through the bounded
//! diagnostic formatter, so a single record never exceeds one rendering
//! buffer. Messages from concurrent harts may interleave at the byte level;
//! keep log lines short.

use log::{LevelFilter, Metadata, Record};

const LOGGER: Logger = Logger {};

struct Logger {}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::mprintln!("{:<5}: {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Initializes the logger at the given level. Call once during bring-up,
/// after the console backends are registered.
pub fn init(level: LevelFilter) {
    log::set_max_level(level);
    log::set_logger(&LOGGER).unwrap();
}
