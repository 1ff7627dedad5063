//! # Ports Layer
//!
//! - **Driving Ports (Inbound):** the API the transport exposes to the client facade
//! - **Driven Ports (Outbound):** the channel, channel-manager and clock SPIs
//!   the host must supply

pub mod inbound;
pub mod outbound;

pub use inbound::TransportApi;
pub use outbound::{Channel, ChannelManager, Clock, SendMode};
