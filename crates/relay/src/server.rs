// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP listener and accept loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::session::{run_session, SessionLimits};
use crate::state::ServerState;

/// Pause after a failed accept (e.g. fd exhaustion) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handle to a running relay.
pub struct RelayServer {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayServer {
    /// Bind the listener and start accepting. Bind failures are returned,
    /// never retried.
    pub async fn start(config: &Config) -> anyhow::Result<Self> {
        let addr = config.bind_addr();
        let listener =
            TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let state = Arc::new(ServerState::new(config.outbound_queue, shutdown.clone()));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&state),
            SessionLimits::from(config),
            shutdown.clone(),
        ));

        Ok(Self {
            local_addr,
            state,
            shutdown,
            stopped: AtomicBool::new(false),
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await;
    }

    /// Stop accepting, close every client, and clear state. Safe to call
    /// more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        let closed = self.state.close_all().await;

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(err = %e, "accept task failed");
            }
        }
        info!(closed, "relay stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    limits: SessionLimits,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%addr, err = %e, "set_nodelay failed");
                }
                // Register before the session runs so stop() can reach it.
                let (client, outbound) = state.register(addr).await;
                info!(client_id = client.id, %addr, "client connected");
                tokio::spawn(run_session(
                    stream,
                    Arc::clone(&state),
                    client,
                    outbound,
                    limits.clone(),
                ));
            }
            Err(e) => {
                warn!(err = %e, "accept failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    debug!("accept loop exited");
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
