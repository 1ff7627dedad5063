//! # Adapters Layer
//!
//! Concrete implementations of the driven ports.
//!
//! - `system_clock` - [`Clock`](crate::ports::Clock) over `std::time::Instant`
//! - `tcp` - [`ChannelManager`](crate::ports::ChannelManager) over TCP streams
//!   (feature `tcp`)

pub mod system_clock;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use system_clock::SystemClock;

#[cfg(feature = "tcp")]
pub use tcp::{TcpChannel, TcpChannelManager, TcpEndpoints};
