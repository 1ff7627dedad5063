//! # Push Dispatcher
//!
//! Fire-and-forget path: callers enqueue single-frame updates, one worker
//! drains them onto the push channel with non-blocking sends.
//!
//! Nothing here is ever reported back to a caller. Overflow evictions,
//! frames refused by a full channel and send failures are logged and counted.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::domain::{
    BackoffPolicy, ChannelRole, ChannelState, ChannelStatusBoard, RingBuffer, ShutdownSignal,
    TransportConfig,
};
use crate::metrics::TransportMetrics;
use crate::ports::outbound::{Channel, ChannelManager, Clock, SendMode};
use crate::service::worker::WorkerLoop;

const ROLE: ChannelRole = ChannelRole::Push;

/// Consumer loop for the push channel.
pub struct PushDispatcher {
    buffer: RingBuffer<Bytes>,
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

impl PushDispatcher {
    pub fn new(
        config: &TransportConfig,
        manager: Arc<dyn ChannelManager>,
        clock: Arc<dyn Clock>,
        status: Arc<ChannelStatusBoard>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            buffer: RingBuffer::new(config.push_buffer_capacity),
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

    /// Queue a frame. Never blocks; a full buffer drops its oldest frame.
    pub fn enqueue(&self, frame: impl Into<Bytes>) {
        self.metrics.record_push_enqueued();
        if self.buffer.write(frame.into()).is_some() {
            self.metrics.record_push_dropped();
            debug!(
                capacity = self.buffer.capacity(),
                "Push buffer full, oldest frame dropped"
            );
        }
    }

    pub fn queue_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    fn is_interrupted(&self) -> bool {
        self.shutdown.is_raised()
    }

    /// Make sure `slot` holds a channel. On acquire failure, back off and return false.
    fn ensure_channel(&self, slot: &mut Option<Box<dyn Channel>>) -> bool {
        if slot.is_some() {
            return true;
        }
        match self.manager.acquire_channel(ROLE) {
            Ok(channel) => {
                *slot = Some(channel);
                self.attempt.store(1, Ordering::SeqCst);
                self.status.set(ROLE, ChannelState::Connected);
                true
            }
            Err(err) => {
                self.metrics.record_channel_error();
                self.status.set(ROLE, ChannelState::Disconnected);

                let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
                let delay = self.backoff.delay_for(attempt);
                warn!(
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Push channel unavailable"
                );
                self.clock.sleep_unless(delay, &self.shutdown);
                false
            }
        }
    }

    /// One non-blocking send attempt for `frame`.
    fn dispatch(&self, slot: &mut Option<Box<dyn Channel>>, frame: &[u8]) {
        if !self.ensure_channel(slot) {
            self.metrics.record_push_dropped();
            return;
        }
        let Some(channel) = slot.as_mut() else {
            return;
        };

        match channel.send_message(&[frame], SendMode::DontWait) {
            Ok(()) => {
                self.metrics.record_push_sent();
                trace!(len = frame.len(), "Push frame sent");
            }
            Err(err) if err.is_would_block() => {
                self.metrics.record_push_dropped();
                debug!(len = frame.len(), "Push channel full, frame dropped");
            }
            Err(err) if err.is_rejected_input() => {
                self.metrics.record_push_dropped();
                warn!(error = %err, "Push frame refused by channel, dropped");
            }
            Err(err) => {
                self.metrics.record_push_send_failure();
                warn!(error = %err, "Push send failed, channel will be replaced");
                self.status.set(ROLE, ChannelState::Reconnecting);
                if let Some(old) = slot.take() {
                    self.manager.release_channel(ROLE, old);
                }
                self.metrics.record_reconnect();
            }
        }
    }
}

impl WorkerLoop for PushDispatcher {
    fn run(&self) {
        self.alive.store(true, Ordering::SeqCst);
        info!(capacity = self.buffer.capacity(), "Push dispatcher running");

        let mut channel = match self.manager.acquire_channel(ROLE) {
            Ok(handle) => {
                self.status.set(ROLE, ChannelState::Connected);
                Some(handle)
            }
            Err(err) => {
                debug!(error = %err, "Push channel not available yet");
                None
            }
        };

        while let Some(frame) = self.buffer.read_blocking() {
            self.dispatch(&mut channel, &frame);
            if self.is_interrupted() {
                break;
            }
        }

        if let Some(handle) = channel.take() {
            self.manager.release_channel(ROLE, handle);
        }
        self.status.set(ROLE, ChannelState::Disconnected);
        self.alive.store(false, Ordering::SeqCst);
        info!(unsent = self.buffer.len(), "Push dispatcher stopped");
    }

    fn interrupt(&self) {
        if self.shutdown.raise() {
            info!("Push dispatcher interrupted");
        }
        self.buffer.close();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "xt-push"
    }
}
