//! Stream client settings.
//!
//! Every field is optional on the wire; the accessors fill in defaults so a
//! partial file (or none at all) still yields a usable configuration.
//!
//! ```json
//! {
//!   "baseReconnectDelayMs": 3000,
//!   "maxReconnectAttempts": 5,
//!   "maxReconnectDelayMs": 300000,
//!   "autoConnect": true,
//!   "streamUrlTemplate": "https://dash.example.com/api/monitors/{id}/stream"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default base reconnect delay in milliseconds.
pub const DEFAULT_BASE_RECONNECT_DELAY_MS: u64 = 3000;
/// Default number of consecutive failures before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default ceiling for one reconnect delay in milliseconds.
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 300_000;
/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default API path used to look up a stream URL.
pub const DEFAULT_API_STREAM_PATH: &str = "monitors/{id}/stream-url";

/// Errors loading a settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read settings file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings JSON.
    #[error("cannot parse settings file {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Stream client settings as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Delay before the first retry, in milliseconds.
    pub base_reconnect_delay_ms: Option<u64>,
    /// Consecutive failures before the client gives up.
    pub max_reconnect_attempts: Option<u32>,
    /// Ceiling for one retry delay in milliseconds; `0` disables the ceiling.
    pub max_reconnect_delay_ms: Option<u64>,
    /// Connect as soon as a client is created.
    pub auto_connect: Option<bool>,
    /// Stream URL with an `{id}` placeholder.
    pub stream_url_template: Option<String>,
    /// Dashboard API base URL, used when no template is set.
    pub api_base_url: Option<String>,
    /// API path answering with the stream URL, relative to `api_base_url`.
    pub api_stream_path: Option<String>,
    /// Bearer token for the API and the stream.
    pub auth_token: Option<String>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
}

impl StreamSettings {
    /// Loads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses settings from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Overlays `other` on `self`: every `Some` in `other` wins.
    pub fn merge(self, other: StreamSettings) -> StreamSettings {
        StreamSettings {
            base_reconnect_delay_ms: other.base_reconnect_delay_ms.or(self.base_reconnect_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            max_reconnect_delay_ms: other.max_reconnect_delay_ms.or(self.max_reconnect_delay_ms),
            auto_connect: other.auto_connect.or(self.auto_connect),
            stream_url_template: other.stream_url_template.or(self.stream_url_template),
            api_base_url: other.api_base_url.or(self.api_base_url),
            api_stream_path: other.api_stream_path.or(self.api_stream_path),
            auth_token: other.auth_token.or(self.auth_token),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
        }
    }

    /// Base reconnect delay.
    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(
            self.base_reconnect_delay_ms
                .unwrap_or(DEFAULT_BASE_RECONNECT_DELAY_MS),
        )
    }

    /// Attempt ceiling.
    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }

    /// Delay ceiling, `None` when disabled with `0`.
    pub fn max_reconnect_delay(&self) -> Option<Duration> {
        match self
            .max_reconnect_delay_ms
            .unwrap_or(DEFAULT_MAX_RECONNECT_DELAY_MS)
        {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Whether clients connect on creation.
    pub fn auto_connect(&self) -> bool {
        self.auto_connect.unwrap_or(false)
    }

    /// Connect timeout for the stream transport.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    /// API path template for stream URL lookups.
    pub fn api_stream_path(&self) -> &str {
        self.api_stream_path
            .as_deref()
            .unwrap_or(DEFAULT_API_STREAM_PATH)
    }
}
