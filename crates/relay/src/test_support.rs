// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use crate::config::Config;
use crate::server::RelayServer;

/// Start a relay on an ephemeral loopback port.
pub async fn spawn_relay() -> anyhow::Result<RelayServer> {
    RelayServer::start(&Config::test()).await
}

/// Like [`spawn_relay`], with the config adjusted by `f` first.
pub async fn spawn_relay_with(f: impl FnOnce(&mut Config)) -> anyhow::Result<RelayServer> {
    let mut config = Config::test();
    f(&mut config);
    RelayServer::start(&config).await
}

/// Assert that an expression is `Err` and its message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
