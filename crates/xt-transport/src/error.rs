//! Error types for the transport core

use crate::domain::{ChannelRole, RequestId};
use std::io;
use thiserror::Error;

/// Errors surfaced by the request, push and compression paths.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request was evicted from the ring buffer before it was sent.
    #[error("Request {request_id} dropped: request buffer overflow")]
    BufferOverflowDrop { request_id: RequestId },

    #[error("No reply for request {request_id} within {timeout_ms} ms")]
    ReplyTimeout { request_id: RequestId, timeout_ms: u64 },

    #[error("Mismatched reply id: expected {expected}, received {received}")]
    ProtocolMismatch {
        expected: RequestId,
        received: RequestId,
    },

    #[error("Channel I/O error: {0}")]
    ChannelIo(#[from] io::Error),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Channel {role} unavailable: {reason}")]
    ChannelUnavailable { role: ChannelRole, reason: String },

    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    #[error("Invalid transport configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn {worker} worker: {source}")]
    WorkerSpawn {
        worker: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{worker} worker panicked")]
    WorkerPanicked { worker: &'static str },

    #[error("Transport interrupted")]
    Interrupted,
}

impl TransportError {
    /// Whether this failure means the channel itself is suspect and must be
    /// replaced before the next request goes out.
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(
            self,
            TransportError::ReplyTimeout { .. }
                | TransportError::MalformedReply(_)
                | TransportError::ChannelUnavailable { .. }
        ) || (matches!(self, TransportError::ChannelIo(_)) && !self.is_rejected_input())
    }

    /// The channel refused the message before writing anything; the stream
    /// is still usable.
    pub fn is_rejected_input(&self) -> bool {
        matches!(self, TransportError::ChannelIo(e) if e.kind() == io::ErrorKind::InvalidInput)
    }

    /// A non-blocking send that found the channel full.
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::ChannelIo(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

/// Errors from the compression codec or its text encoding
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Compression failed: {0}")]
    CompressFailed(io::Error),

    #[error("Decompression failed: {0}")]
    DecompressFailed(io::Error),

    #[error("Invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
