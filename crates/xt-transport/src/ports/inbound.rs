//! # Driving Ports (Inbound API)
//!
//! What the client facade calls: it encodes commands to bytes, hands them to
//! the transport and decodes the replies itself.

use crate::error::{CompressionError, TransportError};
use crate::service::{ResponseFuture, SubscriptionId, UpdateCallback};

/// Primary API of the transport core.
pub trait TransportApi: Send + Sync {
    /// Queue a request; the returned future resolves with the reply payload.
    fn submit(&self, payload: Vec<u8>) -> ResponseFuture;

    /// Queue a fire-and-forget push frame. Never blocks.
    fn enqueue_push(&self, frame: Vec<u8>);

    /// Run `callback` for every update published under `key`. The empty key
    /// receives every update.
    fn subscribe(&self, key: &str, callback: UpdateCallback) -> SubscriptionId;

    /// Returns false if `id` was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Compress with the shared adaptive level.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Stop the worker loops and fail every outstanding request.
    fn shutdown(&self) -> Result<(), TransportError>;
}
