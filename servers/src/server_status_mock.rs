//! # Status Stream Mock Server
//!
//! Serves synthetic monitor status streams for exercising the status stream
//! client by hand:
//!
//! - `GET /api/monitors/{id}/stream`: SSE with a `status` event every interval
//!   and a `result` event every fifth tick;
//! - `GET /api/monitors/{id}/stream-url`: `{ "url": ... }` for endpoint lookups;
//! - `GET /health`.
//!
//! `--malformed-every` and `--drop-after` inject bad payloads and remote closes.

use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;

mod status_mock;
use lib_statusstream::loggers;
use status_mock::{config, feed::FeedSettings, routes};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    let _guard = loggers::setup_logging("server_status_mock", &config.log_dir(), config.log_level())?;
    tracing::info!(?config, "configuration loaded");

    let state = routes::MockState {
        feed: FeedSettings {
            malformed_every: config.malformed_every.unwrap_or(0),
            drop_after: config.drop_after.unwrap_or(0),
        },
        interval: config.interval(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status mock listening on http://{}", addr);

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete.");
    Ok(())
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
