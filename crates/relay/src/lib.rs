// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tiltrelay: WebSocket relay between phone sensors and a game client.
//!
//! Phones send direction commands and gyro readings as JSON text frames.
//! The game registers itself with a `UNITY_INIT` marker and receives every
//! gyro payload verbatim.

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod handshake;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod test_support;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::server::RelayServer;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the relay until interrupted.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = RelayServer::start(&config).await?;
    info!("tiltrelay listening on {}", server.local_addr());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupt received, shutting down");
        }
        _ = server.stopped() => {}
    }

    server.stop().await;
    Ok(())
}
