//! # Data Retrieval Module
//!
//! Generic HTTP client plumbing shared by the components that talk to the
//! dashboard API, such as the stream endpoint lookup.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: an `ApiClient` built on `reqwest` and `reqwest-middleware`
//!   with automatic retries on transient failures and standardized JSON response
//!   handling.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
