//! # Push Transport
//!
//! The seam between the session and the network. A [`PushTransport`] turns an
//! endpoint into a stream of [`TransportEvent`]s: first `Opened`, then one
//! `Message` per server event. An error item or the end of the stream means the
//! connection is gone. Dropping the stream closes the connection.
//!
//! [`SseTransport`] is the production implementation: a long-lived `GET` over
//! `reqwest` whose body is framed by `eventsource-stream`.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::{Event as SseMessage, Eventsource};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Url};

use super::error::TransportError;
use crate::configs::StreamSettings;

/// Lifecycle and payload events of one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and events may follow.
    Opened,
    /// A named server event.
    Message {
        /// Event category.
        event: String,
        /// Raw payload.
        data: String,
        /// Last event id, if the server sends them.
        id: Option<String>,
    },
}

impl From<SseMessage> for TransportEvent {
    fn from(message: SseMessage) -> Self {
        TransportEvent::Message {
            event: message.event,
            data: message.data,
            id: Some(message.id).filter(|id| !id.is_empty()),
        }
    }
}

/// Events of one open transport.
pub type EventStream = BoxStream<'static, Result<TransportEvent, TransportError>>;

/// Opens push connections.
pub trait PushTransport: Send + Sync {
    /// Creates the transport for `endpoint`.
    ///
    /// Errors returned here are construction failures (the handle could not even
    /// be created). Connection work happens lazily when the stream is polled.
    fn open(&self, endpoint: &str) -> Result<EventStream, TransportError>;
}

/// Server-sent events over HTTP.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: Client,
    auth_token: Option<String>,
}

impl SseTransport {
    /// Builds a transport with its own HTTP client.
    ///
    /// Only the connect phase is bounded by `connect_timeout`; an open stream may
    /// stay idle for as long as the server wants.
    pub fn new(connect_timeout: Duration, auth_token: Option<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("lib_statusstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Construction(e.to_string()))?;
        Ok(Self::with_client(client, auth_token))
    }

    /// Builds a transport from loaded settings.
    pub fn from_settings(settings: &StreamSettings) -> Result<Self, TransportError> {
        Self::new(settings.connect_timeout(), settings.auth_token.clone())
    }

    /// Wraps an existing HTTP client.
    pub fn with_client(client: Client, auth_token: Option<String>) -> Self {
        Self { client, auth_token }
    }
}

impl PushTransport for SseTransport {
    fn open(&self, endpoint: &str) -> Result<EventStream, TransportError> {
        let url = Url::parse(endpoint)
            .map_err(|e| TransportError::Construction(format!("{}: {}", endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::Construction(format!(
                "{}: unsupported scheme {}",
                endpoint,
                url.scheme()
            )));
        }

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        Ok(event_stream(request))
    }
}

enum Phase {
    Pending(RequestBuilder),
    Streaming(EventStream),
    Finished,
}

fn event_stream(request: RequestBuilder) -> EventStream {
    stream::unfold(Phase::Pending(request), |phase| async move {
        match phase {
            Phase::Pending(request) => match send(request).await {
                Ok(response) => {
                    let next = Phase::Streaming(messages(response.bytes_stream()));
                    Some((Ok(TransportEvent::Opened), next))
                }
                Err(e) => Some((Err(e), Phase::Finished)),
            },
            Phase::Streaming(mut events) => match events.next().await {
                Some(Ok(event)) => Some((Ok(event), Phase::Streaming(events))),
                Some(Err(e)) => Some((Err(e), Phase::Finished)),
                None => None,
            },
            Phase::Finished => None,
        }
    })
    .boxed()
}

/// Frames a raw event-stream body into messages. The first read or framing
/// error is reported as [`TransportError::Read`].
fn messages<S, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    body.eventsource()
        .map(|item| match item {
            Ok(message) => {
                tracing::trace!(event = %message.event, bytes = message.data.len(), "stream message");
                Ok(TransportEvent::from(message))
            }
            Err(e) => Err(TransportError::Read(e.to_string())),
        })
        .boxed()
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, TransportError> {
    let response = request
        .send()
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !content_type.starts_with("text/event-stream") {
        return Err(TransportError::ContentType(content_type));
    }

    Ok(response)
}
