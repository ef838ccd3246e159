// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

/// Smallest handshake limit that still fits a minimal upgrade request.
const MIN_HANDSHAKE_BYTES: usize = 64;

/// WebSocket relay between phone sensors and the game client.
#[derive(Debug, Clone, Parser)]
#[command(name = "tiltrelay", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "TILTRELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "TILTRELAY_PORT")]
    pub port: u16,

    /// Largest frame (or reassembled message) a client may send, in bytes.
    #[arg(long, default_value_t = 1024 * 1024, env = "TILTRELAY_MAX_FRAME_BYTES")]
    pub max_frame_bytes: usize,

    /// Largest upgrade request accepted, in bytes.
    #[arg(long, default_value_t = 8192, env = "TILTRELAY_MAX_HANDSHAKE_BYTES")]
    pub max_handshake_bytes: usize,

    /// Time allowed for the upgrade request to arrive, in milliseconds.
    #[arg(long, default_value_t = 5000, env = "TILTRELAY_HANDSHAKE_TIMEOUT_MS")]
    pub handshake_timeout_ms: u64,

    /// Per-client outbound queue depth.
    #[arg(long, default_value_t = 64, env = "TILTRELAY_OUTBOUND_QUEUE")]
    pub outbound_queue: usize,

    /// Send a welcome message once the handshake completes.
    #[arg(long, env = "TILTRELAY_GREETING")]
    pub greeting: bool,

    /// Log filter (e.g. "info", "tiltrelay=debug").
    #[arg(long, default_value = "info", env = "TILTRELAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text or json).
    #[arg(long, default_value = "text", env = "TILTRELAY_LOG_FORMAT")]
    pub log_format: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_frame_bytes == 0 {
            anyhow::bail!("--max-frame-bytes must be greater than zero");
        }
        if self.outbound_queue == 0 {
            anyhow::bail!("--outbound-queue must be greater than zero");
        }
        if self.max_handshake_bytes < MIN_HANDSHAKE_BYTES {
            anyhow::bail!("--max-handshake-bytes must be at least {MIN_HANDSHAKE_BYTES}");
        }
        match self.log_format.as_str() {
            "text" | "json" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Defaults for an ephemeral local server.
    pub fn test() -> Self {
        Self::parse_from(["tiltrelay", "--host", "127.0.0.1", "--port", "0"])
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
