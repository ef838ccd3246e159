// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP upgrade negotiation. Only `Sec-WebSocket-Key` is interpreted; the
//! request line, path, and every other header are ignored.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};

use crate::error::HandshakeError;

/// Fixed GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "sec-websocket-key:";

/// Compute `base64(sha1(trim(key) + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut input = String::with_capacity(client_key.len() + WS_GUID.len());
    input.push_str(client_key.trim());
    input.push_str(WS_GUID);
    STANDARD.encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, input.as_bytes()))
}

/// Index just past the `\r\n\r\n` that terminates the request headers.
pub fn request_complete(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Extract the client key from the request headers.
fn find_key(request: &str) -> Option<&str> {
    request.lines().find_map(|line| {
        let head = line.get(..KEY_HEADER.len())?;
        if !head.eq_ignore_ascii_case(KEY_HEADER) {
            return None;
        }
        let value = line[KEY_HEADER.len()..].trim();
        (!value.is_empty()).then_some(value)
    })
}

/// Build the 101 response for a raw upgrade request.
pub fn negotiate(request: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    let request = std::str::from_utf8(request).map_err(|_| HandshakeError::InvalidEncoding)?;
    let key = find_key(request).ok_or(HandshakeError::MissingKey)?;
    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    )
    .into_bytes())
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
