//! # status_watch
//!
//! Follows the live status of one or more monitors and prints every decoded
//! status as a JSON line on stdout. Connection state changes go to stdout as
//! `# <resource> <state>` lines; everything else goes to the log.
//!
//! Configuration is layered: defaults, then the JSON file (`--config-path`,
//! default `status_watch.conf`, same keys as the library's stream settings),
//! then environment variables and CLI flags.
//!
//! ```text
//! status_watch --resource 42 --resource 43 \
//!     --stream-url-template 'http://localhost:9010/api/monitors/{id}/stream'
//! ```

use anyhow::{bail, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use lib_statusstream::configs::StreamSettings;
use lib_statusstream::loggers;
use lib_statusstream::streams::{
    resolver_from_settings, ClientOptions, ConnectionState, PushTransport, ResourceId, SseTransport,
    StatusStreamClient,
};

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Follow live monitor status streams", version)]
#[serde(rename_all = "camelCase", default)]
struct Config {
    #[clap(long = "resource", env = "STATUS_WATCH_RESOURCES", value_delimiter = ',', help = "Resource id to follow; repeat for several.")]
    resources: Vec<String>,

    #[clap(long, env = "STATUS_WATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    config_path: Option<PathBuf>,

    #[clap(long, env = "STATUS_WATCH_LOG_DIR", help = "Directory for log files.")]
    log_dir: Option<PathBuf>,

    #[clap(long, env = "STATUS_WATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error, fatal).")]
    log_level: Option<String>,

    #[clap(long, env = "STATUS_STREAM_URL_TEMPLATE", help = "Stream URL with an {id} placeholder.")]
    stream_url_template: Option<String>,

    #[clap(long, env = "STATUS_API_BASE_URL", help = "Dashboard API base URL used to look up stream URLs.")]
    api_base_url: Option<String>,

    #[clap(long, env = "STATUS_API_STREAM_PATH", help = "API path answering with the stream URL, relative to the base URL.")]
    api_stream_path: Option<String>,

    #[clap(long, env = "STATUS_AUTH_TOKEN", help = "Bearer token for the API and the stream.")]
    auth_token: Option<String>,

    #[clap(long, env = "STATUS_BASE_RECONNECT_DELAY_MS", help = "Delay before the first reconnect attempt.")]
    base_reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "STATUS_MAX_RECONNECT_ATTEMPTS", help = "Consecutive failures before giving up.")]
    max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "STATUS_MAX_RECONNECT_DELAY_MS", help = "Ceiling for one reconnect delay (0 disables).")]
    max_reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "STATUS_CONNECT_TIMEOUT_SECS", help = "Connect timeout for the stream.")]
    connect_timeout_secs: Option<u64>,
}

impl Config {
    // 'other' overrides 'self' for Some values and non-empty lists
    fn merge(self, other: Config) -> Config {
        Config {
            resources: if other.resources.is_empty() { self.resources } else { other.resources },
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            stream_url_template: other.stream_url_template.or(self.stream_url_template),
            api_base_url: other.api_base_url.or(self.api_base_url),
            api_stream_path: other.api_stream_path.or(self.api_stream_path),
            auth_token: other.auth_token.or(self.auth_token),
            base_reconnect_delay_ms: other.base_reconnect_delay_ms.or(self.base_reconnect_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            max_reconnect_delay_ms: other.max_reconnect_delay_ms.or(self.max_reconnect_delay_ms),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
        }
    }

    fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            base_reconnect_delay_ms: self.base_reconnect_delay_ms,
            max_reconnect_attempts: self.max_reconnect_attempts,
            max_reconnect_delay_ms: self.max_reconnect_delay_ms,
            auto_connect: Some(true),
            stream_url_template: self.stream_url_template.clone(),
            api_base_url: self.api_base_url.clone(),
            api_stream_path: self.api_stream_path.clone(),
            auth_token: self.auth_token.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }
}

fn load_config() -> Config {
    layer_config(Config::parse())
}

fn layer_config(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("status_watch.conf"));

    let mut current = Config::default();
    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_config) => current = current.merge(file_config),
                Err(e) => eprintln!("Failed to parse config file {}: {}", config_file_path.display(), e),
            },
            Err(e) => eprintln!("Failed to read config file {}: {}", config_file_path.display(), e),
        }
    }
    current.merge(cli)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = load_config();
    let _guard = loggers::setup_logging("status_watch", &config.log_dir(), config.log_level())?;

    if config.resources.is_empty() {
        bail!("nothing to watch: pass at least one --resource");
    }

    let settings = config.stream_settings();
    let resolver = resolver_from_settings(&settings)?;
    let transport: Arc<dyn PushTransport> = Arc::new(SseTransport::from_settings(&settings)?);

    let mut clients = Vec::with_capacity(config.resources.len());
    for raw_id in &config.resources {
        let resource = ResourceId::from(raw_id.as_str());
        let (state_label, error_label) = (resource.to_string(), resource.to_string());

        let options = ClientOptions::from_settings(resource, &settings)
            .on_status_update(|event| match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Cannot serialize status: {}", e),
            })
            .on_connection_state_change(move |state| println!("# {} {}", state_label, state))
            .on_error(move |error| tracing::debug!(resource = %error_label, %error, "stream error"));

        clients.push(StatusStreamClient::new(options, Arc::clone(&resolver), Arc::clone(&transport))?);
    }
    tracing::info!(count = clients.len(), "watching status streams");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut health = tokio::time::interval(Duration::from_secs(1));
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = health.tick() => {
                if clients.iter().all(|c| c.connection_state() == ConnectionState::Error) {
                    tracing::error!("every status stream gave up");
                    break Err(anyhow::anyhow!("all status streams failed"));
                }
            }
        }
    };

    // Clients are auto-connected, so dropping them disconnects.
    drop(clients);
    tracing::info!("Shutdown complete.");
    outcome
}

async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            tracing::info!("SIGTERM received, initiating shutdown.");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
