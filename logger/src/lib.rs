// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sends log messages to stdout or stderr depending on severity.
//!
//! The logging macros (`error!`, `warn!`, `info!`, `debug!`) silently drop
//! their messages until `Logger::init()` has been called and returned `Ok`.
//!
//! # Examples
//!
//! ```
//! #[macro_use]
//! extern crate log;
//! extern crate logger;
//! use logger::Logger;
//!
//! fn main() {
//!     if let Err(e) = Logger::new().init() {
//!         println!("could not initialize the log subsystem: {:?}", e);
//!         return;
//!     }
//!     warn!("this is a warning");
//!     error!("this is an error");
//! }
//! ```

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Failures of the log subsystem itself.
#[derive(Debug, PartialEq)]
pub enum LoggerError {
    /// `init()` was called a second time, or another logger was already installed.
    AlreadyInitialized,
}

/// A `log::Log` implementation writing leveled lines to the standard streams.
///
/// Warnings and errors go to stderr, everything else to stdout.
pub struct Logger {
    level: LevelFilter,
}

impl Logger {
    pub fn new() -> Logger {
        Logger {
            level: LevelFilter::Info,
        }
    }

    /// Change the maximum level that will be emitted.
    pub fn with_level(mut self, level: LevelFilter) -> Logger {
        self.level = level;
        self
    }

    /// Install this logger as the process-wide log backend. May only succeed once.
    pub fn init(self) -> Result<(), LoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self)).map_err(|_| LoggerError::AlreadyInitialized)?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Default for Logger {
    fn default() -> Logger {
        Logger::new()
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let line = format!(
            "[{}.{:03} {} {}] {}",
            now.as_secs(),
            now.subsec_millis(),
            record.level(),
            record.target(),
            record.args()
        );
        match record.level() {
            Level::Error | Level::Warn => {
                let _ = writeln!(io::stderr(), "{}", line);
            }
            _ => {
                let _ = writeln!(io::stdout(), "{}", line);
            }
        }
    }

    fn flush(&self) {}
}
