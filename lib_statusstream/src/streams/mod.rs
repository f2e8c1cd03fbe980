//! # Status Streams Module
//!
//! Everything needed to follow the live status of a monitored resource over a
//! server-pushed event stream.
//!
//! ## Contained Modules:
//!
//! - **`state`**: `ConnectionState`, its transition table and the `BackoffPolicy`.
//! - **`event`**: the `StatusEvent` record and the payload decoder.
//! - **`session`**: `StreamSession`, the synchronous core that turns transport
//!   lifecycle inputs into effects (open, close, retry, notify).
//! - **`client`**: `StatusStreamClient`, the facade that executes those effects
//!   on the tokio runtime and exposes the read model and callbacks.
//! - **`transport`**: the push transport seam and its SSE implementation over
//!   `reqwest`.
//! - **`endpoint`**: resolution of a resource id into a stream URL.
//! - **`error`**: error types shared by the above.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The facade tying session, transport and callbacks together.
pub mod client;
/// Resource id to stream URL resolution.
pub mod endpoint;
/// Error types for transports, sessions and the client.
pub mod error;
/// Status event records and the payload decoder.
pub mod event;
/// The synchronous session core.
pub mod session;
/// Connection states, transitions and backoff policy.
pub mod state;
/// The push transport seam and its SSE implementation.
pub mod transport;

pub use client::{ClientOptions, ClientSnapshot, StatusStreamClient};
pub use endpoint::{
    resolver_from_settings, ApiEndpointResolver, EndpointResolver, StaticEndpoint, TemplateEndpoint,
};
pub use error::{ClientError, StreamError, TransportError};
pub use event::{decode_status_event, DecodeError, EventKind, ProbeStatus, ResourceId, StatusEvent};
pub use session::{Effect, Notification, SessionInput, StreamSession};
pub use state::{BackoffPolicy, ConnectionState, Trigger};
pub use transport::{EventStream, PushTransport, SseTransport, TransportEvent};
