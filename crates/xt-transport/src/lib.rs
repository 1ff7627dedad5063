//! # XTables Transport Core
//!
//! Client-side concurrency and transport layer for XTables, a key-value
//! table server with publish-style updates used on FRC robots.
//!
//! The crate carries opaque byte payloads; building commands such as
//! `PUT key value` and decoding replies is left to the client facade.
//!
//! ## Components
//!
//! - [`RingBuffer`] - bounded MPSC queue that drops the oldest item when full
//! - [`RequestCorrelator`] - one request on the wire at a time, replies
//!   matched by a 64-bit id, channel replacement with linear backoff
//! - [`PushDispatcher`] - fire-and-forget frames over a non-blocking send
//! - [`UpdateReceiver`] and [`UpdateDispatcher`] - server updates coalesced
//!   per key and handed to subscribed callbacks
//! - [`AdaptiveCompressor`] - zlib with a self-tuning level
//! - [`XTablesTransport`] - owns all of the above and their worker threads
//!
//! ## Architecture
//!
//! - **Domain Layer:** ring buffer, framing, backoff, channel states, compression, config
//! - **Ports Layer:** `Channel`, `ChannelManager`, `Clock` (driven) and `TransportApi` (driving)
//! - **Service Layer:** the worker loops and the facade
//! - **Adapters Layer:** `SystemClock` and the TCP channel manager
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xt_transport::{
//!     SystemClock, TcpChannelManager, TcpEndpoints, TransportApi, TransportConfig,
//!     XTablesTransport,
//! };
//!
//! let manager = TcpChannelManager::new(TcpEndpoints::default())?;
//! let transport = XTablesTransport::start(
//!     TransportConfig::load("xtables.toml")?,
//!     Arc::new(manager),
//!     Arc::new(SystemClock::new()),
//! )?;
//!
//! let reply = transport.submit(b"PUT a 1".to_vec()).wait()?;
//! assert_eq!(&reply[..], b"OK");
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

/// Manual clock and scripted channels.
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use domain::{
    AdaptiveCompressor, BackoffPolicy, ChannelRole, ChannelState, ChannelStatusBoard,
    CompressionConfig, CompressionState, LevelAdjustment, RequestId, RingBuffer, ShutdownSignal,
    TransportConfig, TransportConfigBuilder,
};
pub use error::{CompressionError, ConfigError, TransportError};
pub use metrics::{MetricsSnapshot, TransportMetrics};
pub use ports::{Channel, ChannelManager, Clock, SendMode, TransportApi};
pub use service::{
    PendingRequest, PushDispatcher, RequestCorrelator, ResponseFuture, SubscriptionId,
    SubscriptionRegistry, Update, UpdateCallback, UpdateDispatcher, UpdateReceiver, WorkerHandle,
    WorkerLoop, XTablesTransport, WILDCARD_KEY,
};

pub use adapters::SystemClock;

#[cfg(feature = "tcp")]
pub use adapters::{TcpChannel, TcpChannelManager, TcpEndpoints};
