use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Mock monitoring API serving synthetic status streams", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "STATUS_MOCK_PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[clap(long, env = "STATUS_MOCK_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STATUS_MOCK_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STATUS_MOCK_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error, fatal).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STATUS_MOCK_INTERVAL_MS", help = "Milliseconds between status events on each stream.")]
    pub interval_ms: Option<u64>,

    #[clap(long, env = "STATUS_MOCK_MALFORMED_EVERY", help = "Send a malformed payload every N events (0 disables).")]
    pub malformed_every: Option<u64>,

    #[clap(long, env = "STATUS_MOCK_DROP_AFTER", help = "Close each stream after N events (0 keeps streams open).")]
    pub drop_after: Option<u64>,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            interval_ms: other.interval_ms.or(self.interval_ms),
            malformed_every: other.malformed_every.or(self.malformed_every),
            drop_after: other.drop_after.or(self.drop_after),
        }
    }

    pub fn defaults() -> Config {
        Config {
            port: Some(9010),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            interval_ms: Some(2000),
            malformed_every: Some(0),
            drop_after: Some(0),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9010)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or(2000).max(1))
    }
}

/// Layers defaults, then the JSON file, then environment variables and CLI flags.
///
/// Runs before logging is set up, so problems with the file go to stderr.
pub fn load_config() -> Config {
    let cli = Config::parse();
    layer_config(cli)
}

pub(crate) fn layer_config(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_status_mock.conf"));

    let mut current = Config::defaults();
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
