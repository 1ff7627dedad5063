//! # Subscription Updates
//!
//! Inbound path: the server publishes `[key, payload]` messages on the
//! subscribe channel. Two workers share one ring buffer:
//!
//! - [`UpdateReceiver`] reads messages off the channel and queues them,
//!   reacquiring the channel with backoff when it fails.
//! - [`UpdateDispatcher`] takes the newest update, drops older queued
//!   updates for the same key and hands it to every callback registered
//!   for that key, then to the wildcard callbacks.
//!
//! The receiver only opens the channel once something is subscribed.

use bytes::Bytes;
use parking_lot::RwLock;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::domain::{
    BackoffPolicy, ChannelRole, ChannelState, ChannelStatusBoard, RingBuffer, ShutdownSignal,
    TransportConfig,
};
use crate::error::TransportError;
use crate::metrics::TransportMetrics;
use crate::ports::outbound::{Channel, ChannelManager, Clock};
use crate::service::worker::WorkerLoop;

const ROLE: ChannelRole = ChannelRole::Subscribe;

/// Longest single wait on the channel or on an empty registry.
const RECEIVE_SLICE: Duration = Duration::from_millis(50);

/// Key under which callbacks receive every update.
pub const WILDCARD_KEY: &str = "";

/// One update published by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub key: String,
    pub payload: Bytes,
}

impl Update {
    pub fn new(key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// Parse a `[key, payload]` message. The key must be UTF-8.
    pub fn from_parts(mut parts: Vec<Bytes>) -> Option<Self> {
        if parts.len() != 2 {
            return None;
        }
        let payload = parts.pop()?;
        let key = String::from_utf8(parts.pop()?.to_vec()).ok()?;
        Some(Self { key, payload })
    }
}

pub type UpdateCallback = Arc<dyn Fn(&Update) + Send + Sync>;

/// Handle returned by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callbacks by key. [`WILDCARD_KEY`] matches every update.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    entries: RwLock<HashMap<String, Vec<(SubscriptionId, UpdateCallback)>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: &str, callback: UpdateCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries
            .write()
            .entry(key.to_string())
            .or_default()
            .push((id, callback));
        debug!(%id, key, "Subscription added");
        id
    }

    /// Remove one callback. Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let mut removed = false;
        entries.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(entry, _)| *entry != id);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        if removed {
            debug!(%id, "Subscription removed");
        }
        removed
    }

    /// Callbacks for `key` followed by the wildcard callbacks.
    pub fn callbacks_for(&self, key: &str) -> Vec<UpdateCallback> {
        let entries = self.entries.read();
        let exact = entries.get(key).into_iter().flatten();
        let wildcard = if key == WILDCARD_KEY {
            None
        } else {
            entries.get(WILDCARD_KEY)
        };
        exact
            .chain(wildcard.into_iter().flatten())
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("callbacks", &self.len())
            .finish()
    }
}

// =============================================================================
// RECEIVER
// =============================================================================

/// Reads updates off the subscribe channel into the shared buffer.
pub struct UpdateReceiver {
    buffer: Arc<RingBuffer<Update>>,
    registry: Arc<SubscriptionRegistry>,
    shutdown: ShutdownSignal,
    alive: AtomicBool,
    /// Next reacquire attempt number, starting at 1.
    attempt: AtomicU32,
    backoff: BackoffPolicy,
    manager: Arc<dyn ChannelManager>,
    clock: Arc<dyn Clock>,
    status: Arc<ChannelStatusBoard>,
    metrics: Arc<TransportMetrics>,
}

impl UpdateReceiver {
    pub fn new(
        config: &TransportConfig,
        buffer: Arc<RingBuffer<Update>>,
        registry: Arc<SubscriptionRegistry>,
        manager: Arc<dyn ChannelManager>,
        clock: Arc<dyn Clock>,
        status: Arc<ChannelStatusBoard>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            buffer,
            registry,
            shutdown: ShutdownSignal::new(),
            alive: AtomicBool::new(false),
            attempt: AtomicU32::new(1),
            backoff: config.backoff_policy(),
            manager,
            clock,
            status,
            metrics,
        }
    }

    fn is_interrupted(&self) -> bool {
        self.shutdown.is_raised()
    }

    /// Sleep the backoff for the next attempt, unless interrupted first.
    fn back_off(&self) {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        let delay = self.backoff.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Subscribe backoff");
        if self.clock.sleep_unless(delay, &self.shutdown) {
            debug!(attempt, "Subscribe backoff cut short by interrupt");
        }
    }

    fn acquire(&self) -> Option<Box<dyn Channel>> {
        match self.manager.acquire_channel(ROLE) {
            Ok(channel) => {
                self.status.set(ROLE, ChannelState::Connected);
                info!(attempt = self.attempt.load(Ordering::SeqCst), "Subscribe channel acquired");
                Some(channel)
            }
            Err(err) => {
                self.metrics.record_channel_error();
                self.status.set(ROLE, ChannelState::Disconnected);
                warn!(error = %err, "Subscribe channel unavailable");
                self.back_off();
                None
            }
        }
    }

    /// Release a failed channel and back off before the next acquire.
    fn replace(&self, slot: &mut Option<Box<dyn Channel>>, err: &TransportError) {
        self.metrics.record_channel_error();
        warn!(error = %err, "Subscribe channel failed, replacing");
        self.status.set(ROLE, ChannelState::Reconnecting);
        if let Some(old) = slot.take() {
            self.manager.release_channel(ROLE, old);
        }
        self.metrics.record_reconnect();
        self.back_off();
    }

    /// Queue one received message.
    fn accept(&self, parts: Vec<Bytes>) {
        let part_count = parts.len();
        let Some(update) = Update::from_parts(parts) else {
            self.metrics.record_update_malformed();
            warn!(parts = part_count, "Malformed subscription update ignored");
            return;
        };

        self.attempt.store(1, Ordering::SeqCst);
        self.metrics.record_update_received();
        trace!(key = %update.key, len = update.payload.len(), "Update received");
        if let Some(evicted) = self.buffer.write(update) {
            self.metrics.record_update_dropped();
            debug!(
                key = %evicted.key,
                capacity = self.buffer.capacity(),
                "Update buffer full, oldest update dropped"
            );
        }
    }

    /// One bounded wait for a message on the channel in `slot`.
    fn receive_once(&self, slot: &mut Option<Box<dyn Channel>>) {
        let Some(channel) = slot.as_mut() else {
            return;
        };
        let received = match channel.poll_readable(RECEIVE_SLICE) {
            Ok(false) => return,
            Ok(true) => channel.recv_message(),
            Err(err) => Err(err),
        };
        match received {
            Ok(parts) => self.accept(parts),
            Err(err) if self.is_interrupted() => {
                debug!(error = %err, "Subscribe receive failed during shutdown");
            }
            Err(err) => self.replace(slot, &err),
        }
    }
}

impl WorkerLoop for UpdateReceiver {
    fn run(&self) {
        self.alive.store(true, Ordering::SeqCst);
        info!(capacity = self.buffer.capacity(), "Update receiver running");

        let mut channel: Option<Box<dyn Channel>> = None;
        while !self.is_interrupted() {
            if channel.is_none() {
                if self.registry.is_empty() {
                    self.shutdown.wait_timeout(RECEIVE_SLICE);
                    continue;
                }
                channel = self.acquire();
                continue;
            }
            self.receive_once(&mut channel);
        }

        if let Some(handle) = channel.take() {
            self.manager.release_channel(ROLE, handle);
        }
        self.status.set(ROLE, ChannelState::Disconnected);
        self.alive.store(false, Ordering::SeqCst);
        info!("Update receiver stopped");
    }

    fn interrupt(&self) {
        if self.shutdown.raise() {
            info!("Update receiver interrupted");
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "xt-subscribe"
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Delivers queued updates to registered callbacks, newest per key first.
pub struct UpdateDispatcher {
    buffer: Arc<RingBuffer<Update>>,
    registry: Arc<SubscriptionRegistry>,
    shutdown: ShutdownSignal,
    alive: AtomicBool,
    metrics: Arc<TransportMetrics>,
}

impl UpdateDispatcher {
    pub fn new(
        buffer: Arc<RingBuffer<Update>>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            buffer,
            registry,
            shutdown: ShutdownSignal::new(),
            alive: AtomicBool::new(false),
            metrics,
        }
    }

    /// Block for the newest update, dropping queued updates with its key.
    fn next_update(&self) -> Option<Update> {
        let superseded = Cell::new(0u64);
        let update = self.buffer.read_latest_and_clear_matching(|latest, item| {
            let stale = item.key == latest.key;
            if stale {
                superseded.set(superseded.get() + 1);
            }
            stale
        })?;
        if superseded.get() > 0 {
            self.metrics.record_updates_coalesced(superseded.get());
            trace!(key = %update.key, superseded = superseded.get(), "Updates coalesced");
        }
        Some(update)
    }

    /// Run every callback for `update`. A panicking callback is logged and
    /// does not stop the others.
    fn deliver(&self, update: &Update) {
        for callback in self.registry.callbacks_for(&update.key) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(update)));
            if outcome.is_err() {
                self.metrics.record_callback_panic();
                warn!(key = %update.key, "Subscription callback panicked");
            }
        }
        self.metrics.record_update_dispatched();
    }
}

impl WorkerLoop for UpdateDispatcher {
    fn run(&self) {
        self.alive.store(true, Ordering::SeqCst);
        info!("Update dispatcher running");

        while let Some(update) = self.next_update() {
            self.deliver(&update);
            if self.shutdown.is_raised() {
                break;
            }
        }

        self.alive.store(false, Ordering::SeqCst);
        info!(undelivered = self.buffer.len(), "Update dispatcher stopped");
    }

    fn interrupt(&self) {
        if self.shutdown.raise() {
            info!("Update dispatcher interrupted");
        }
        self.buffer.close();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "xt-updates"
    }
}
