//! # Driven Ports (Outbound SPI)
//!
//! Interfaces the host application provides: live channel handles, the
//! manager that creates and replaces them, and a time source.

use bytes::Bytes;
use std::time::Duration;

use crate::domain::{ChannelRole, ShutdownSignal};
use crate::error::TransportError;

/// How a send should behave when the channel cannot accept data right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Wait until the whole message is handed to the channel.
    Blocking,
    /// Fail with `WouldBlock` instead of waiting.
    DontWait,
}

/// A connected, message-oriented channel.
///
/// A handle is owned by exactly one worker loop at a time, so the methods
/// take `&mut self` and implementations only need to be `Send`.
///
/// # Example Implementation
///
/// ```rust,ignore
/// struct LoopbackChannel {
///     queue: VecDeque<Vec<Bytes>>,
/// }
///
/// impl Channel for LoopbackChannel {
///     fn send_message(&mut self, parts: &[&[u8]], _mode: SendMode) -> Result<(), TransportError> {
///         self.queue.push_back(parts.iter().map(|p| Bytes::copy_from_slice(p)).collect());
///         Ok(())
///     }
///     // ...
/// }
/// ```
pub trait Channel: Send {
    /// Send one message made of `parts` (at least one).
    fn send_message(&mut self, parts: &[&[u8]], mode: SendMode) -> Result<(), TransportError>;

    /// Wait up to `timeout` for an incoming message.
    ///
    /// Returns `Ok(false)` when nothing became readable in time.
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool, TransportError>;

    /// Receive one whole message. Only called after `poll_readable` returned true.
    fn recv_message(&mut self) -> Result<Vec<Bytes>, TransportError>;
}

/// Creates and disposes of channel handles.
///
/// The transport never decides how a channel is built; it only asks for a
/// fresh one after discarding a suspect handle.
pub trait ChannelManager: Send + Sync {
    /// Open a connected channel for `role`.
    fn acquire_channel(&self, role: ChannelRole) -> Result<Box<dyn Channel>, TransportError>;

    /// Give back a handle the transport is done with.
    fn release_channel(&self, role: ChannelRole, channel: Box<dyn Channel>);
}

/// Monotonic time and sleeping, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    /// Monotonic nanoseconds since an arbitrary origin.
    fn current_time_nanos(&self) -> u64;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Sleep for `duration` unless `signal` is raised first.
    ///
    /// Returns `true` when the sleep was cut short by the signal.
    fn sleep_unless(&self, duration: Duration, signal: &ShutdownSignal) -> bool {
        signal.wait_timeout(duration)
    }
}
