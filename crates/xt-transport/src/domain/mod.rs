//! # Domain Layer
//!
//! Pure transport building blocks with no I/O of their own: the drop-oldest
//! ring buffer, wire framing, the backoff schedule, the channel state machine,
//! the adaptive compressor, configuration and the worker stop signal.

pub mod backoff;
pub mod channel_state;
pub mod compression;
pub mod config;
pub mod frame;
pub mod ring_buffer;
pub mod signal;

pub use backoff::BackoffPolicy;
pub use channel_state::{ChannelRole, ChannelState, ChannelStatusBoard};
pub use compression::{
    AdaptiveCompressor, CompressionConfig, CompressionState, LevelAdjustment, BEST_COMPRESSION,
    DEFAULT_INITIAL_LEVEL, NO_COMPRESSION,
};
pub use config::{TransportConfig, TransportConfigBuilder};
pub use frame::{
    decode_reply, encode_message, FrameDecoder, RequestId, StreamFrame, DEFAULT_MAX_FRAME_LEN,
    FLAG_MORE, FRAME_HEADER_LEN, REQUEST_ID_LEN,
};
pub use ring_buffer::RingBuffer;
pub use signal::ShutdownSignal;
