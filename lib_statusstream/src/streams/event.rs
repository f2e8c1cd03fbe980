//! # Status Events
//!
//! The typed record carried by `status` and `result` stream events, and the
//! decoder that turns a raw JSON payload into it. Decoding is purely structural:
//! unknown status strings pass through untouched and the consumer decides how to
//! present them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifier of a monitored resource. Dashboards use numeric ids, but any
/// opaque string is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    /// Numeric id, e.g. a monitor's primary key.
    Numeric(i64),
    /// Any other identifier.
    Opaque(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Numeric(id) => write!(f, "{}", id),
            ResourceId::Opaque(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(id: i64) -> Self {
        ResourceId::Numeric(id)
    }
}

impl From<i32> for ResourceId {
    fn from(id: i32) -> Self {
        ResourceId::Numeric(i64::from(id))
    }
}

impl From<u32> for ResourceId {
    fn from(id: u32) -> Self {
        ResourceId::Numeric(i64::from(id))
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        match id.parse::<i64>() {
            Ok(numeric) => ResourceId::Numeric(numeric),
            Err(_) => ResourceId::Opaque(id.to_string()),
        }
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        ResourceId::from(id.as_str())
    }
}

/// Outcome reported by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProbeStatus {
    /// The probe succeeded.
    Success,
    /// The probe failed.
    Failed,
    /// The probe did not answer in time.
    Timeout,
    /// A probe is in progress.
    Running,
    /// Nothing is known about the resource.
    Unknown,
    /// A value this client does not know, kept verbatim.
    Other(String),
}

static UNKNOWN: ProbeStatus = ProbeStatus::Unknown;

impl ProbeStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::Failed => "failed",
            ProbeStatus::Timeout => "timeout",
            ProbeStatus::Running => "running",
            ProbeStatus::Unknown => "unknown",
            ProbeStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for ProbeStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "success" => ProbeStatus::Success,
            "failed" => ProbeStatus::Failed,
            "timeout" => ProbeStatus::Timeout,
            "running" => ProbeStatus::Running,
            "unknown" => ProbeStatus::Unknown,
            _ => ProbeStatus::Other(raw),
        }
    }
}

impl From<ProbeStatus> for String {
    fn from(status: ProbeStatus) -> Self {
        match status {
            ProbeStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status update for a monitored resource.
///
/// Only the most recent event is ever kept by the client; a new one replaces the
/// previous value outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// The resource this update is about.
    #[serde(alias = "monitor_id", alias = "resourceId", alias = "monitorId")]
    pub resource_id: ResourceId,
    /// Probe outcome.
    pub status: ProbeStatus,
    /// Measured latency in milliseconds.
    #[serde(
        default,
        rename = "response_time",
        alias = "response_time_ms",
        alias = "responseTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_time_ms: Option<f64>,
    /// Result code of the probe, e.g. an HTTP status.
    #[serde(default, alias = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    /// Human readable failure detail.
    #[serde(default, alias = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Event generation time, ISO-8601, kept as sent.
    pub timestamp: String,
    /// Embedded detail payload, opaque to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set when the status is stale.
    #[serde(default, alias = "isExpired", skip_serializing_if = "Option::is_none")]
    pub is_expired: Option<bool>,
}

impl StatusEvent {
    /// Whether the server marked this status as stale.
    pub fn is_expired(&self) -> bool {
        self.is_expired.unwrap_or(false)
    }

    /// The status a consumer should display: `Unknown` for expired events.
    pub fn effective_status(&self) -> &ProbeStatus {
        if self.is_expired() {
            &UNKNOWN
        } else {
            &self.status
        }
    }
}

/// Stream event categories that carry a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Periodic status of the resource.
    Status,
    /// Outcome of a single probe run.
    Result,
}

impl EventKind {
    /// Maps a wire event name. Every other category is ignored by the client.
    pub fn from_name(name: &str) -> Option<EventKind> {
        match name {
            "status" => Some(EventKind::Status),
            "result" => Some(EventKind::Result),
            _ => None,
        }
    }

    /// Wire event name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Result => "result",
        }
    }
}

/// A payload that is not a well-formed status record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed status payload: {0}")]
pub struct DecodeError(String);

/// Parses a raw JSON payload into a [`StatusEvent`].
pub fn decode_status_event(payload: &str) -> Result<StatusEvent, DecodeError> {
    serde_json::from_str(payload).map_err(|e| DecodeError(e.to_string()))
}
