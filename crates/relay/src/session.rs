// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection session: handshake, frame loop, teardown.
//!
//! A session task exclusively owns its socket and frame buffer. Other tasks
//! reach the peer only through the client's outbound queue, which the
//! session drains alongside socket reads in a single select loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::codec::{self, Decoded, Frame, OpCode};
use crate::config::Config;
use crate::error::{FrameError, HandshakeError};
use crate::event::ServerMessage;
use crate::handshake;
use crate::router;
use crate::state::{ClientHandle, ServerState};

/// Upper bound on the best-effort close frame and socket shutdown.
const CLOSE_DEADLINE: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;

const HANDSHAKE_REJECTION: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Handshaking,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Accepted,
    HandshakeSucceeded,
    HandshakeFailed,
    PeerClosed,
    ReadFailed,
    ProtocolViolation,
    ShutdownRequested,
    SocketClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionPhase,
    pub event: SessionEvent,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session transition: {:?} on {:?}", self.from, self.event)
    }
}

impl std::error::Error for InvalidTransition {}

impl SessionPhase {
    pub fn on(self, event: SessionEvent) -> Result<Self, InvalidTransition> {
        use SessionEvent as E;
        match (self, event) {
            (Self::Connecting, E::Accepted) => Ok(Self::Handshaking),
            (Self::Handshaking, E::HandshakeSucceeded) => Ok(Self::Open),
            (Self::Handshaking, E::HandshakeFailed) => Ok(Self::Closed),
            (Self::Handshaking, E::ShutdownRequested) => Ok(Self::Closing),
            (
                Self::Open,
                E::PeerClosed | E::ReadFailed | E::ProtocolViolation | E::ShutdownRequested,
            ) => Ok(Self::Closing),
            (Self::Closing, E::SocketClosed) => Ok(Self::Closed),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame.
    PeerClosed,
    /// Peer closed the TCP stream.
    Eof,
    ReadError(String),
    WriteError(String),
    HandshakeFailed(HandshakeError),
    HandshakeTimeout,
    Protocol(FrameError),
    /// Frame or reassembled message exceeded the configured limit.
    FrameTooLarge(u64),
    Shutdown,
}

impl CloseReason {
    /// Event that moves a session out of its current phase for this reason.
    pub fn event(&self) -> SessionEvent {
        match self {
            Self::PeerClosed | Self::Eof => SessionEvent::PeerClosed,
            Self::ReadError(_) | Self::WriteError(_) => SessionEvent::ReadFailed,
            Self::HandshakeFailed(_) | Self::HandshakeTimeout => SessionEvent::HandshakeFailed,
            Self::Protocol(_) | Self::FrameTooLarge(_) => SessionEvent::ProtocolViolation,
            Self::Shutdown => SessionEvent::ShutdownRequested,
        }
    }

    /// Stable code for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "PEER_CLOSED",
            Self::Eof => "EOF",
            Self::ReadError(_) => "READ_ERROR",
            Self::WriteError(_) => "WRITE_ERROR",
            Self::HandshakeFailed(e) => e.as_str(),
            Self::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            Self::Protocol(e) => e.as_str(),
            Self::FrameTooLarge(_) => "FRAME_TOO_LARGE",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// RFC6455 status code for the best-effort close frame, if one is sent.
    fn close_code(&self) -> Option<u16> {
        match self {
            Self::Shutdown => Some(1001),
            Self::Protocol(FrameError::InvalidUtf8) => Some(1007),
            Self::Protocol(_) => Some(1002),
            Self::FrameTooLarge(_) => Some(1009),
            _ => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer sent close"),
            Self::Eof => f.write_str("peer disconnected"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::WriteError(e) => write!(f, "write error: {e}"),
            Self::HandshakeFailed(e) => write!(f, "handshake failed: {e}"),
            Self::HandshakeTimeout => f.write_str("handshake timed out"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::FrameTooLarge(n) => write!(f, "frame too large: {n} bytes"),
            Self::Shutdown => f.write_str("server shutdown"),
        }
    }
}

/// Per-session limits derived from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_frame_bytes: usize,
    pub max_handshake_bytes: usize,
    pub handshake_timeout: Duration,
    pub greeting: bool,
}

impl From<&Config> for SessionLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            max_handshake_bytes: config.max_handshake_bytes,
            handshake_timeout: config.handshake_timeout(),
            greeting: config.greeting,
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            max_handshake_bytes: 8192,
            handshake_timeout: Duration::from_secs(5),
            greeting: false,
        }
    }
}

/// A message split across continuation frames.
struct Fragmented {
    text: bool,
    data: Vec<u8>,
}

pub struct Session<S> {
    stream: S,
    state: Arc<ServerState>,
    client: Arc<ClientHandle>,
    outbound: mpsc::Receiver<String>,
    limits: SessionLimits,
    phase: SessionPhase,
    buffer: BytesMut,
    fragments: Option<Fragmented>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        state: Arc<ServerState>,
        client: Arc<ClientHandle>,
        outbound: mpsc::Receiver<String>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            stream,
            state,
            client,
            outbound,
            limits,
            phase: SessionPhase::Connecting,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            fragments: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn transition(&mut self, event: SessionEvent) {
        match self.phase.on(event) {
            Ok(next) => {
                trace!(client_id = self.client.id, from = ?self.phase, to = ?next, "session transition");
                self.phase = next;
            }
            Err(e) => {
                warn!(client_id = self.client.id, "{e}");
                self.phase = SessionPhase::Closed;
            }
        }
    }

    /// Drive the session to completion and deregister the client.
    pub async fn run(mut self) -> CloseReason {
        self.transition(SessionEvent::Accepted);

        let mut upgraded = false;
        let reason = match self.handshake().await {
            Ok(()) => {
                upgraded = true;
                self.transition(SessionEvent::HandshakeSucceeded);
                debug!(client_id = self.client.id, addr = %self.client.addr, "websocket open");
                let reason = self.open_loop().await;
                self.transition(reason.event());
                reason
            }
            Err(CloseReason::Shutdown) => {
                self.transition(SessionEvent::ShutdownRequested);
                CloseReason::Shutdown
            }
            Err(reason) => {
                self.transition(SessionEvent::HandshakeFailed);
                reason
            }
        };

        if self.phase == SessionPhase::Closing {
            self.close(&reason, upgraded).await;
            self.transition(SessionEvent::SocketClosed);
        } else {
            // Handshake failure closes without a WebSocket close frame.
            if matches!(reason, CloseReason::HandshakeFailed(_)) {
                let _ = tokio::time::timeout(
                    CLOSE_DEADLINE,
                    self.stream.write_all(HANDSHAKE_REJECTION),
                )
                .await;
            }
            let _ = tokio::time::timeout(CLOSE_DEADLINE, self.stream.shutdown()).await;
        }

        self.client.cancel.cancel();
        self.state.remove(self.client.id).await;
        info!(
            client_id = self.client.id,
            addr = %self.client.addr,
            role = %self.client.role(),
            code = reason.as_str(),
            connected_ms = self.client.connected_at.elapsed().as_millis() as u64,
            %reason,
            "client disconnected"
        );
        reason
    }

    /// Read the upgrade request and answer it.
    async fn handshake(&mut self) -> Result<(), CloseReason> {
        let cancel = self.client.cancel.clone();
        let timeout = self.limits.handshake_timeout;
        let end = tokio::select! {
            _ = cancel.cancelled() => return Err(CloseReason::Shutdown),
            read = tokio::time::timeout(timeout, self.read_request()) => match read {
                Ok(result) => result?,
                Err(_) => return Err(CloseReason::HandshakeTimeout),
            },
        };

        // Anything after the terminator is already frame data.
        let request = self.buffer.split_to(end);
        let response = handshake::negotiate(&request).map_err(CloseReason::HandshakeFailed)?;
        self.write_raw(&response).await
    }

    async fn read_request(&mut self) -> Result<usize, CloseReason> {
        loop {
            if let Some(end) = handshake::request_complete(&self.buffer) {
                return Ok(end);
            }
            if self.buffer.len() >= self.limits.max_handshake_bytes {
                return Err(CloseReason::HandshakeFailed(HandshakeError::TooLarge(
                    self.limits.max_handshake_bytes,
                )));
            }
            self.buffer.reserve(READ_CHUNK);
            match self.stream.read_buf(&mut self.buffer).await {
                Ok(0) => return Err(CloseReason::HandshakeFailed(HandshakeError::Truncated)),
                Ok(_) => {}
                Err(e) => return Err(CloseReason::ReadError(e.to_string())),
            }
        }
    }

    async fn open_loop(&mut self) -> CloseReason {
        if self.limits.greeting {
            let welcome = ServerMessage::Welcome { client_id: self.client.id }.to_json();
            if let Err(reason) = self.write_frame(OpCode::Text, welcome.as_bytes()).await {
                return reason;
            }
        }

        // Frames may have arrived in the same read as the upgrade request.
        if let Err(reason) = self.drain_frames().await {
            return reason;
        }

        let cancel = self.client.cancel.clone();
        loop {
            self.buffer.reserve(READ_CHUNK);
            tokio::select! {
                _ = cancel.cancelled() => return CloseReason::Shutdown,
                outbound = self.outbound.recv() => {
                    let Some(text) = outbound else {
                        return CloseReason::Shutdown;
                    };
                    if let Err(reason) = self.write_frame(OpCode::Text, text.as_bytes()).await {
                        return reason;
                    }
                }
                read = self.stream.read_buf(&mut self.buffer) => match read {
                    Ok(0) => return CloseReason::Eof,
                    Ok(_) => {
                        if let Err(reason) = self.drain_frames().await {
                            return reason;
                        }
                    }
                    Err(e) => return CloseReason::ReadError(e.to_string()),
                },
            }
        }
    }

    /// Decode and handle every complete frame in the buffer, in order.
    async fn drain_frames(&mut self) -> Result<(), CloseReason> {
        loop {
            if let Some(required) = codec::required_length(&self.buffer) {
                if required > self.limits.max_frame_bytes as u64 {
                    return Err(CloseReason::FrameTooLarge(required));
                }
            }
            let Some(len) = codec::frame_length(&self.buffer) else {
                return Ok(());
            };
            let frame = match codec::decode(&self.buffer[..len]) {
                Ok(Decoded::Complete { value, .. }) => value,
                Ok(Decoded::Incomplete) => return Ok(()),
                Err(e) => return Err(CloseReason::Protocol(e)),
            };
            self.buffer.advance(len);
            self.handle_frame(frame).await?;
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), CloseReason> {
        if !frame.masked {
            return Err(CloseReason::Protocol(FrameError::Unmasked));
        }

        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragments.is_some() {
                    return Err(CloseReason::Protocol(FrameError::UnexpectedContinuation));
                }
                let text = frame.opcode == OpCode::Text;
                if frame.fin {
                    self.deliver(text, frame.payload).await
                } else {
                    self.fragments = Some(Fragmented { text, data: frame.payload });
                    Ok(())
                }
            }
            OpCode::Continuation => {
                let Some(mut pending) = self.fragments.take() else {
                    return Err(CloseReason::Protocol(FrameError::UnexpectedContinuation));
                };
                pending.data.extend_from_slice(&frame.payload);
                if pending.data.len() > self.limits.max_frame_bytes {
                    return Err(CloseReason::FrameTooLarge(pending.data.len() as u64));
                }
                if frame.fin {
                    self.deliver(pending.text, pending.data).await
                } else {
                    self.fragments = Some(pending);
                    Ok(())
                }
            }
            OpCode::Ping => self.write_frame(OpCode::Pong, &frame.payload).await,
            OpCode::Pong => Ok(()),
            OpCode::Close => {
                // Echo the status back; the peer is leaving either way.
                let _ = tokio::time::timeout(
                    CLOSE_DEADLINE,
                    self.write_frame(OpCode::Close, &frame.payload),
                )
                .await;
                Err(CloseReason::PeerClosed)
            }
        }
    }

    async fn deliver(&mut self, text: bool, payload: Vec<u8>) -> Result<(), CloseReason> {
        if !text {
            debug!(client_id = self.client.id, len = payload.len(), "ignoring binary message");
            return Ok(());
        }
        let text = String::from_utf8(payload)
            .map_err(|_| CloseReason::Protocol(FrameError::InvalidUtf8))?;
        let outcome = router::route(&self.state, &self.client, &text).await;
        trace!(client_id = self.client.id, ?outcome, "routed");
        Ok(())
    }

    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), CloseReason> {
        self.write_raw(&codec::encode_frame(opcode, payload)).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CloseReason> {
        self.stream.write_all(bytes).await.map_err(|e| CloseReason::WriteError(e.to_string()))?;
        self.stream.flush().await.map_err(|e| CloseReason::WriteError(e.to_string()))
    }

    /// Best-effort close frame followed by socket shutdown, bounded by
    /// [`CLOSE_DEADLINE`].
    async fn close(&mut self, reason: &CloseReason, upgraded: bool) {
        let code = reason.close_code().filter(|_| upgraded);
        let _ = tokio::time::timeout(CLOSE_DEADLINE, async {
            if let Some(code) = code {
                let _ = self.write_frame(OpCode::Close, &code.to_be_bytes()).await;
            }
            let _ = self.stream.shutdown().await;
        })
        .await;
    }
}

/// Run a session for an accepted connection.
pub async fn run_session<S>(
    stream: S,
    state: Arc<ServerState>,
    client: Arc<ClientHandle>,
    outbound: mpsc::Receiver<String>,
    limits: SessionLimits,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Session::new(stream, state, client, outbound, limits).run().await
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
