//! # lib_statusstream
//!
//! Shared library for the monitoring dashboard's live status feeds. The heart of
//! the crate is [`streams::StatusStreamClient`], a resilient server-sent events
//! client that keeps one push connection per monitored resource alive, tracks its
//! health through an explicit state machine and recovers from transport failures
//! with bounded exponential backoff.
//!
//! Modules are gated by folder-level features, mirroring how the binaries pick
//! what they need:
//!
//! - **`configs`**: stream client settings loaded from JSON and merged over defaults.
//! - **`loggers`**: `tracing` subscriber setup with stdout and file output.
//! - **`retrieve`**: retrying HTTP API client used to look up stream endpoints.
//! - **`streams`**: the status stream client itself.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "streams")]
pub mod streams;

#[cfg(feature = "streams")]
pub use streams::{
    ClientOptions, ClientSnapshot, ConnectionState, ProbeStatus, ResourceId, StatusEvent,
    StatusStreamClient, StreamError,
};
