// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application payloads carried in text frames, and the notifications the
//! relay emits to in-process subscribers.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Substring that registers the sender as the primary client.
pub const INIT_MARKER: &str = "UNITY_INIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "stop" => Ok(Self::Stop),
            other => anyhow::bail!("invalid direction: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionEvent {
    #[serde(rename = "Direction")]
    pub direction: Direction,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Device orientation in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GyroEvent {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Phones send either an ISO string or epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}

/// A decoded inbound payload, tried in precedence order:
/// init marker, direction, gyro.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Init,
    Direction(DirectionEvent),
    Gyro(GyroEvent),
    Unrecognized { reason: String },
}

impl InboundMessage {
    pub fn classify(text: &str) -> Self {
        if text.contains(INIT_MARKER) {
            return Self::Init;
        }

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Self::Unrecognized { reason: format!("not JSON: {e}") },
        };
        if !value.is_object() {
            return Self::Unrecognized { reason: "not a JSON object".to_owned() };
        }

        // A present "Direction" key commits to the direction schema; an
        // out-of-enum value is rejected rather than reinterpreted as gyro.
        if value.get("Direction").is_some() {
            return match serde_json::from_value::<DirectionEvent>(value) {
                Ok(event) => Self::Direction(event),
                Err(e) => Self::Unrecognized { reason: format!("invalid direction: {e}") },
            };
        }

        let numeric = |key: &str| value.get(key).is_some_and(serde_json::Value::is_number);
        if numeric("alpha") && numeric("beta") && numeric("gamma") {
            return match serde_json::from_value::<GyroEvent>(value) {
                Ok(event) => Self::Gyro(event),
                Err(e) => Self::Unrecognized { reason: format!("invalid gyro: {e}") },
            };
        }

        Self::Unrecognized { reason: "no known payload shape".to_owned() }
    }
}

/// Messages the relay itself writes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack { direction: Direction },
    Connected { message: String },
    Welcome { client_id: u64 },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Notifications for in-process subscribers (the game side).
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    ClientConnected { client_id: u64, addr: SocketAddr },
    ClientDisconnected { client_id: u64 },
    PrimaryRegistered { client_id: u64 },
    Direction { client_id: u64, event: DirectionEvent },
    Gyro { client_id: u64, event: GyroEvent },
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
