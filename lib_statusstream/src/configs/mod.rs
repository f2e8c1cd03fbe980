//! # Configuration Modules
//!
//! Settings for the status stream client, loaded from JSON files and layered
//! over built-in defaults.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Stream client settings and their JSON loader.
pub mod stream_settings;

pub use stream_settings::{ConfigError, StreamSettings};
