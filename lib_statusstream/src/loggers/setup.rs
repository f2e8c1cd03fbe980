use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log files kept per application, the one being created included.
pub const KEEP_LOG_FILES: usize = 3;

/// Maps a configured level name onto a `tracing` directive.
///
/// `fatal` has no `tracing` counterpart and becomes `error`; anything
/// unrecognised falls back to `info`.
pub fn normalize_level(log_level: &str) -> &'static str {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" => "error",
        "off" => "off",
        _ => "info",
    }
}

/// Installs the global subscriber for `app_name`.
///
/// - stdout gets human-readable lines with targets and ANSI colours;
/// - `log_dir/<app_name>_<timestamp>.log` gets JSON lines through a non-blocking writer;
/// - `RUST_LOG` overrides `log_level` when set.
///
/// Older log files of the same application are pruned first. The returned guard
/// flushes the file writer when dropped, so keep it alive in `main`.
///
/// # Errors
/// Fails if the log directory cannot be prepared or a subscriber is already installed.
pub fn setup_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    }
    prune_old_logs(log_dir, app_name, KEEP_LOG_FILES.saturating_sub(1))?;

    let file_name = format!(
        "{}_{}.log",
        app_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let file_appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let level = normalize_level(log_level);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("building log filter")?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::info!(app = app_name, level, file = %log_dir.join(&file_name).display(), "logging initialized");
    Ok(guard)
}

/// Deletes all but the `keep` newest `<app_name>_*.log` files in `log_dir`.
///
/// Files of other applications are left alone. Returns the deleted paths.
pub fn prune_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<Vec<PathBuf>> {
    let prefix = format!("{}_", app_name);
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)
        .with_context(|| format!("reading log directory {}", log_dir.display()))?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let path = e.path();
            let is_log = path.extension().is_some_and(|ext| ext == "log");
            let ours = e.file_name().to_string_lossy().starts_with(&prefix);
            is_log && ours
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Newest first; equal timestamps fall back to the name, which embeds the start time.
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = Vec::new();
    for (_, path) in entries.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
