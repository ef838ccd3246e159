// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Reasons an inbound WebSocket frame cannot be decoded.
///
/// Framing has no resync marker, so every variant means the connection is
/// corrupted and must be closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// RSV1-3 set without a negotiated extension.
    ReservedBits(u8),
    /// Opcode outside the RFC6455 table.
    UnknownOpcode(u8),
    /// 64-bit length with the most significant bit set.
    LengthOverflow,
    /// Control frame with FIN=0 or a payload over 125 bytes.
    InvalidControlFrame,
    /// Client frame without the mask bit.
    Unmasked,
    /// Continuation frame with nothing to continue, or a new data frame
    /// while a fragmented message is still open.
    UnexpectedContinuation,
    /// Text payload is not valid UTF-8.
    InvalidUtf8,
}

impl FrameError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReservedBits(_) => "RESERVED_BITS",
            Self::UnknownOpcode(_) => "UNKNOWN_OPCODE",
            Self::LengthOverflow => "LENGTH_OVERFLOW",
            Self::InvalidControlFrame => "INVALID_CONTROL_FRAME",
            Self::Unmasked => "UNMASKED",
            Self::UnexpectedContinuation => "UNEXPECTED_CONTINUATION",
            Self::InvalidUtf8 => "INVALID_UTF8",
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedBits(bits) => write!(f, "reserved bits set: {bits:#05b}"),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode: {op:#x}"),
            Self::LengthOverflow => f.write_str("payload length overflows 63 bits"),
            Self::InvalidControlFrame => f.write_str("control frame fragmented or over 125 bytes"),
            Self::Unmasked => f.write_str("client frame is not masked"),
            Self::UnexpectedContinuation => f.write_str("unexpected continuation frame"),
            Self::InvalidUtf8 => f.write_str("text payload is not valid UTF-8"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Reasons the HTTP upgrade exchange fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// No `Sec-WebSocket-Key` header, or an empty one.
    MissingKey,
    /// Request bytes are not UTF-8.
    InvalidEncoding,
    /// Request headers exceeded the configured limit.
    TooLarge(usize),
    /// Peer closed before the request terminator arrived.
    Truncated,
}

impl HandshakeError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingKey => "MISSING_KEY",
            Self::InvalidEncoding => "INVALID_ENCODING",
            Self::TooLarge(_) => "TOO_LARGE",
            Self::Truncated => "TRUNCATED",
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => f.write_str("missing Sec-WebSocket-Key header"),
            Self::InvalidEncoding => f.write_str("upgrade request is not valid UTF-8"),
            Self::TooLarge(limit) => write!(f, "upgrade request exceeds {limit} bytes"),
            Self::Truncated => f.write_str("connection closed during handshake"),
        }
    }
}

impl std::error::Error for HandshakeError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
