//! # Service Layer
//!
//! The worker loops and the facade that owns them.
//!
//! - [`RequestCorrelator`] - request/reply with id correlation and reconnect
//! - [`PushDispatcher`] - fire-and-forget push frames
//! - [`UpdateReceiver`] / [`UpdateDispatcher`] - inbound updates to callbacks
//! - [`XTablesTransport`] - lifecycle, compression and metrics in one place

pub mod push_dispatcher;
pub mod request_correlator;
pub mod subscription;
pub mod transport_service;
pub mod worker;

pub use push_dispatcher::PushDispatcher;
pub use request_correlator::{PendingRequest, RequestCorrelator, ResponseFuture};
pub use subscription::{
    SubscriptionId, SubscriptionRegistry, Update, UpdateCallback, UpdateDispatcher,
    UpdateReceiver, WILDCARD_KEY,
};
pub use transport_service::XTablesTransport;
pub use worker::{WorkerHandle, WorkerLoop};
