//! Wire framing for the request/reply and push channels.
//!
//! A request is a two-part message: the 8-byte big-endian request id, then
//! the opaque payload. Replies mirror the layout. Push frames are a single
//! part with no id.
//!
//! On a byte stream each part is written as
//!
//! ```text
//! ┌────────┬──────────────┬──────────────────┐
//! │ flags  │ len (u32 BE) │ body (len bytes) │
//! └────────┴──────────────┴──────────────────┘
//! ```
//!
//! where flag bit 0 (`MORE`) marks that another part of the same message follows.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransportError;

/// Length of an encoded request id.
pub const REQUEST_ID_LEN: usize = 8;

/// Length of a stream frame header (flags + length).
pub const FRAME_HEADER_LEN: usize = 5;

/// Flag bit: another part of the same message follows.
pub const FLAG_MORE: u8 = 0b0000_0001;

/// Largest body accepted by default when decoding stream frames.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Monotonic identifier correlating a request with its reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; REQUEST_ID_LEN] {
        self.0.to_be_bytes()
    }

    /// Decode an id frame; anything other than exactly 8 bytes is malformed.
    pub fn from_frame(frame: &[u8]) -> Result<Self, TransportError> {
        let bytes: [u8; REQUEST_ID_LEN] = frame.try_into().map_err(|_| {
            TransportError::MalformedReply(format!(
                "request id frame is {} bytes, expected {}",
                frame.len(),
                REQUEST_ID_LEN
            ))
        })?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split a received reply message into its id and payload.
pub fn decode_reply(mut parts: Vec<Bytes>) -> Result<(RequestId, Bytes), TransportError> {
    if parts.len() != 2 {
        return Err(TransportError::MalformedReply(format!(
            "expected 2 reply frames, got {}",
            parts.len()
        )));
    }
    let payload = parts.pop().unwrap_or_default();
    let id = RequestId::from_frame(&parts[0])?;
    Ok((id, payload))
}

/// Append one message (all of its parts) to `dst` using stream framing.
///
/// Every part must fit a `u32` length; senders check parts against their
/// frame limit first.
pub fn encode_message(parts: &[&[u8]], dst: &mut BytesMut) {
    let total: usize = parts.iter().map(|p| FRAME_HEADER_LEN + p.len()).sum();
    dst.reserve(total);
    for (i, part) in parts.iter().enumerate() {
        let flags = if i + 1 < parts.len() { FLAG_MORE } else { 0 };
        dst.put_u8(flags);
        dst.put_u32(part.len() as u32);
        dst.put_slice(part);
    }
}

/// One decoded stream frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFrame {
    pub more: bool,
    pub body: Bytes,
}

/// Incremental decoder for stream frames.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; consumed bytes are
    /// removed from `src` only when a whole frame is available.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<StreamFrame>, TransportError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let flags = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_frame_len {
            return Err(TransportError::MalformedReply(format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame_len
            )));
        }
        if src.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let body = src.split_to(len).freeze();
        Ok(Some(StreamFrame {
            more: flags & FLAG_MORE != 0,
            body,
        }))
    }

    /// Decode a whole multipart message from the front of `src`.
    ///
    /// Nothing is consumed unless every part of the message is present.
    pub fn decode_message(&self, src: &mut BytesMut) -> Result<Option<Vec<Bytes>>, TransportError> {
        let mut offset = 0;
        loop {
            let header = match src.get(offset..offset + FRAME_HEADER_LEN) {
                Some(header) => header,
                None => return Ok(None),
            };
            let more = header[0] & FLAG_MORE != 0;
            let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
            if len > self.max_frame_len {
                return Err(TransportError::MalformedReply(format!(
                    "frame of {} bytes exceeds limit of {}",
                    len, self.max_frame_len
                )));
            }
            offset += FRAME_HEADER_LEN + len;
            if src.len() < offset {
                return Ok(None);
            }
            if !more {
                break;
            }
        }

        let mut parts = Vec::new();
        while let Some(frame) = self.decode(src)? {
            parts.push(frame.body);
            if !frame.more {
                break;
            }
        }
        Ok(Some(parts))
    }
}
