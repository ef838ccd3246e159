// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RFC6455 base framing.
//!
//! Server frames go out as single unmasked frames. Inbound frames are parsed
//! through a [`Cursor`] so a short buffer surfaces as [`Decoded::Incomplete`]
//! instead of an error; callers keep the bytes and retry after the next read.

use crate::error::FrameError;

/// Largest possible frame header: 2 base bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

/// Largest payload a control frame may carry.
const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A fully decoded (and unmasked) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Consume the frame as UTF-8 text. Invalid sequences are rejected.
    pub fn into_text(self) -> Result<String, FrameError> {
        String::from_utf8(self.payload).map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Result of a decode attempt against a possibly partial buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A whole frame was read; `consumed` bytes belong to it.
    Complete { value: T, consumed: usize },
    /// The buffer ends mid-frame. Nothing was consumed.
    Incomplete,
}

impl<T> Decoded<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        match self {
            Self::Complete { value, consumed } => Decoded::Complete { value: f(value), consumed },
            Self::Incomplete => Decoded::Incomplete,
        }
    }
}

/// Forward-only reader over a byte slice. Every accessor returns `None`
/// once the slice runs out.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Some(out)
    }

    fn position(&self) -> usize {
        self.pos
    }
}

/// Raw header fields, before any validation.
struct Header {
    fin: bool,
    rsv: u8,
    opcode: u8,
    mask: Option<[u8; 4]>,
    payload_len: u64,
    header_len: usize,
}

fn read_header(cur: &mut Cursor<'_>) -> Option<Header> {
    let b0 = cur.u8()?;
    let b1 = cur.u8()?;
    let payload_len = match b1 & 0x7F {
        126 => u64::from(u16::from_be_bytes(cur.array::<2>()?)),
        127 => u64::from_be_bytes(cur.array::<8>()?),
        n => u64::from(n),
    };
    let mask = if b1 & 0x80 != 0 { Some(cur.array::<4>()?) } else { None };
    Some(Header {
        fin: b0 & 0x80 != 0,
        rsv: (b0 >> 4) & 0x07,
        opcode: b0 & 0x0F,
        mask,
        payload_len,
        header_len: cur.position(),
    })
}

/// Total size the next frame occupies once its header is readable, even if
/// the payload has not fully arrived. `None` while the header is still short.
pub fn required_length(buf: &[u8]) -> Option<u64> {
    let header = read_header(&mut Cursor::new(buf))?;
    header.payload_len.checked_add(header.header_len as u64)
}

/// Byte length of the next frame if the buffer already holds all of it.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    let total = usize::try_from(required_length(buf)?).ok()?;
    (buf.len() >= total).then_some(total)
}

/// Decode the frame at the start of `buf`, unmasking its payload.
pub fn decode(buf: &[u8]) -> Result<Decoded<Frame>, FrameError> {
    let mut cur = Cursor::new(buf);
    let Some(header) = read_header(&mut cur) else {
        return Ok(Decoded::Incomplete);
    };

    if header.rsv != 0 {
        return Err(FrameError::ReservedBits(header.rsv));
    }
    let opcode = OpCode::from_u8(header.opcode)?;
    if header.payload_len >> 63 != 0 {
        return Err(FrameError::LengthOverflow);
    }
    if opcode.is_control() && (!header.fin || header.payload_len > MAX_CONTROL_PAYLOAD) {
        return Err(FrameError::InvalidControlFrame);
    }
    let len = usize::try_from(header.payload_len).map_err(|_| FrameError::LengthOverflow)?;

    let Some(raw) = cur.take(len) else {
        return Ok(Decoded::Incomplete);
    };
    let payload = match header.mask {
        Some(key) => raw.iter().enumerate().map(|(i, b)| b ^ key[i % 4]).collect(),
        None => raw.to_vec(),
    };

    Ok(Decoded::Complete {
        value: Frame { fin: header.fin, opcode, masked: header.mask.is_some(), payload },
        consumed: header.header_len + len,
    })
}

/// Decode a single text frame and validate its payload as UTF-8.
pub fn decode_text(buf: &[u8]) -> Result<Decoded<String>, FrameError> {
    match decode(buf)? {
        Decoded::Complete { value, consumed } => {
            Ok(Decoded::Complete { value: value.into_text()?, consumed })
        }
        Decoded::Incomplete => Ok(Decoded::Incomplete),
    }
}

fn write_header(out: &mut Vec<u8>, opcode: OpCode, mask_bit: u8, len: usize) {
    out.push(0x80 | opcode.as_u8());
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Encode a single unmasked, unfragmented frame (server → client).
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + MAX_HEADER_LEN);
    write_header(&mut out, opcode, 0, payload.len());
    out.extend_from_slice(payload);
    out
}

/// Encode a text frame (server → client).
pub fn encode_text(payload: &str) -> Vec<u8> {
    encode_frame(OpCode::Text, payload.as_bytes())
}

/// Encode a masked frame the way a client would send it.
pub fn encode_masked(opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + MAX_HEADER_LEN);
    write_header(&mut out, opcode, 0x80, payload.len());
    out.extend_from_slice(&key);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    out
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
