//! # Loggers Module
//!
//! Process-wide `tracing` setup shared by the binaries.
//!
//! ## Contained Modules:
//!
//! - **`setup`**: installs a subscriber writing human-readable lines to stdout and
//!   JSON lines to a per-run file, and prunes older log files.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Subscriber installation and log file housekeeping.
pub mod setup;

pub use setup::{normalize_level, setup_logging};
