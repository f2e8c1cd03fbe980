//! # Status Stream Mock
//!
//! A stand-in for the monitoring API: one server-sent event stream per monitor
//! plus the lookup route that hands out stream URLs.
//!
//! ## Contained Modules:
//!
//! - **`config`**: layered configuration (defaults, JSON file, env, CLI).
//! - **`feed`**: synthetic probe results, including malformed payloads on request.
//! - **`routes`**: the axum router.

pub mod config;
pub mod feed;
pub mod routes;
