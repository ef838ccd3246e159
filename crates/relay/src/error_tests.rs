// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{FrameError, HandshakeError};

#[yare::parameterized(
    reserved     = { FrameError::ReservedBits(0b100), "RESERVED_BITS" },
    opcode       = { FrameError::UnknownOpcode(0x3), "UNKNOWN_OPCODE" },
    overflow     = { FrameError::LengthOverflow, "LENGTH_OVERFLOW" },
    control      = { FrameError::InvalidControlFrame, "INVALID_CONTROL_FRAME" },
    unmasked     = { FrameError::Unmasked, "UNMASKED" },
    continuation = { FrameError::UnexpectedContinuation, "UNEXPECTED_CONTINUATION" },
    utf8         = { FrameError::InvalidUtf8, "INVALID_UTF8" },
)]
fn frame_error_codes(err: FrameError, code: &str) {
    assert_eq!(err.as_str(), code);
    assert!(!err.to_string().is_empty());
}

#[test]
fn frame_error_display_includes_detail() {
    assert_eq!(FrameError::UnknownOpcode(0xb).to_string(), "unknown opcode: 0xb");
    assert_eq!(FrameError::ReservedBits(0b100).to_string(), "reserved bits set: 0b100");
}

#[test]
fn handshake_error_display() {
    assert_eq!(HandshakeError::MissingKey.to_string(), "missing Sec-WebSocket-Key header");
    assert_eq!(HandshakeError::TooLarge(8192).to_string(), "upgrade request exceeds 8192 bytes");
    assert_eq!(HandshakeError::Truncated.as_str(), "TRUNCATED");
}

#[test]
fn errors_convert_into_anyhow() {
    let err: anyhow::Error = FrameError::InvalidUtf8.into();
    assert!(err.to_string().contains("UTF-8"));
}
