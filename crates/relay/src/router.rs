// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payload dispatch: classify, update last-known state, notify, forward.

use std::sync::Arc;

use tracing::{debug, info};

use crate::event::{Direction, InboundMessage, RelayEvent, ServerMessage};
use crate::state::{ClientHandle, ServerState};

const REGISTERED_MESSAGE: &str = "Unity Client registered successfully";

/// What the router did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sender became the primary client.
    Registered,
    /// Direction accepted and acknowledged.
    Acknowledged(Direction),
    /// Gyro accepted and relayed to the primary.
    Forwarded,
    /// Gyro accepted but no open primary to relay to.
    NotForwarded,
    /// Payload not understood; connection stays open.
    Dropped,
}

/// Route one decoded text payload from `source`.
pub async fn route(state: &ServerState, source: &Arc<ClientHandle>, payload: &str) -> RouteOutcome {
    match InboundMessage::classify(payload) {
        InboundMessage::Init => {
            if let Some(previous) = state.set_primary(source).await {
                info!(client_id = source.id, previous = previous.id, "primary client replaced");
            } else {
                info!(client_id = source.id, addr = %source.addr, "primary client registered");
            }
            source.send(
                ServerMessage::Connected { message: REGISTERED_MESSAGE.to_owned() }.to_json(),
            );
            state.emit(RelayEvent::PrimaryRegistered { client_id: source.id });
            RouteOutcome::Registered
        }
        InboundMessage::Direction(event) => {
            note_secondary(source);
            let direction = event.direction;
            debug!(client_id = source.id, %direction, "direction received");
            state.set_last_direction(event.clone());
            state.emit(RelayEvent::Direction { client_id: source.id, event });
            source.send(ServerMessage::Ack { direction }.to_json());
            RouteOutcome::Acknowledged(direction)
        }
        InboundMessage::Gyro(event) => {
            note_secondary(source);
            debug!(
                client_id = source.id,
                alpha = event.alpha,
                beta = event.beta,
                gamma = event.gamma,
                "gyro received"
            );
            state.set_last_gyro(event.clone());
            state.emit(RelayEvent::Gyro { client_id: source.id, event });

            // Relay the original text so field order and precision survive.
            match state.primary().await {
                Some(primary) if primary.send(payload.to_owned()) => RouteOutcome::Forwarded,
                _ => {
                    debug!(client_id = source.id, "no open primary, gyro not forwarded");
                    RouteOutcome::NotForwarded
                }
            }
        }
        InboundMessage::Unrecognized { reason } => {
            debug!(client_id = source.id, %reason, "dropping payload");
            RouteOutcome::Dropped
        }
    }
}

fn note_secondary(client: &ClientHandle) {
    if client.classify_secondary() {
        info!(client_id = client.id, addr = %client.addr, "secondary client registered");
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
