//! # Request Correlator
//!
//! Multiplexes requests from any number of caller threads onto one ordered
//! request/reply channel.
//!
//! ## Flow
//!
//! 1. `submit` assigns the next id, queues a [`PendingRequest`] in the ring
//!    buffer and hands back a [`ResponseFuture`] at once
//! 2. The worker dequeues in FIFO order and sends `[id (8 bytes BE), payload]`
//! 3. It waits up to the reply timeout for a reply and checks the reply id
//! 4. Timeouts and I/O failures replace the channel after a linear backoff
//!
//! At most one request is on the wire at a time. The request being worked
//! on is held in an explicit in-flight slot so an interrupt can fail it
//! together with everything still queued.

use bytes::Bytes;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::domain::{
    decode_reply, BackoffPolicy, ChannelRole, ChannelState, ChannelStatusBoard, RequestId,
    RingBuffer, ShutdownSignal, TransportConfig,
};
use crate::error::TransportError;
use crate::metrics::TransportMetrics;
use crate::ports::outbound::{Channel, ChannelManager, Clock, SendMode};
use crate::service::worker::WorkerLoop;

const ROLE: ChannelRole = ChannelRole::Request;

/// Longest single wait on the channel before the interrupt flag is rechecked.
const REPLY_POLL_SLICE: Duration = Duration::from_millis(50);

type Reply = Result<Bytes, TransportError>;

/// A queued request and the sender half of its future.
pub struct PendingRequest {
    id: RequestId,
    payload: Bytes,
    responder: oneshot::Sender<Reply>,
}

impl PendingRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Deliver the outcome. Returns false if the caller dropped the future.
    fn complete(self, result: Reply) -> bool {
        self.responder.send(result).is_ok()
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Caller-side handle for one request.
///
/// Await it from async code or call [`ResponseFuture::wait`] from a plain
/// thread. Dropping it cancels nothing on the wire; the reply is discarded.
#[derive(Debug)]
pub struct ResponseFuture {
    request_id: RequestId,
    receiver: oneshot::Receiver<Reply>,
}

impl ResponseFuture {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Block the current thread until the request completes.
    ///
    /// Must not be called from inside an async runtime; `.await` instead.
    pub fn wait(self) -> Reply {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(TransportError::Interrupted))
    }

    /// The outcome if the request already completed.
    pub fn try_take(&mut self) -> Option<Reply> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TransportError::Interrupted)),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TransportError::Interrupted)))
    }
}

/// Request/reply engine for the request channel.
pub struct RequestCorrelator {
    buffer: RingBuffer<PendingRequest>,
    in_flight: Mutex<Option<PendingRequest>>,
    next_id: AtomicU64,
    /// Next reconnect attempt number, starting at 1.
    attempt: AtomicU32,
    shutdown: ShutdownSignal,
    alive: AtomicBool,
    reply_timeout: Duration,
    backoff: BackoffPolicy,
    reset_backoff_on_success: bool,
    mismatch_threshold: u32,
    manager: Arc<dyn ChannelManager>,
    clock: Arc<dyn Clock>,
    status: Arc<ChannelStatusBoard>,
    metrics: Arc<TransportMetrics>,
}

impl RequestCorrelator {
    pub fn new(
        config: &TransportConfig,
        manager: Arc<dyn ChannelManager>,
        clock: Arc<dyn Clock>,
        status: Arc<ChannelStatusBoard>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            buffer: RingBuffer::new(config.request_buffer_capacity),
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(1),
            attempt: AtomicU32::new(1),
            shutdown: ShutdownSignal::new(),
            alive: AtomicBool::new(false),
            reply_timeout: config.reply_timeout(),
            backoff: config.backoff_policy(),
            reset_backoff_on_success: config.reset_backoff_on_success,
            mismatch_threshold: config.mismatch_reconnect_threshold,
            manager,
            clock,
            status,
            metrics,
        }
    }

    /// Queue `payload` for sending. Never blocks.
    ///
    /// If the buffer is full the oldest queued request is evicted and its
    /// future fails with `BufferOverflowDrop`.
    pub fn submit(&self, payload: impl Into<Bytes>) -> ResponseFuture {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (responder, receiver) = oneshot::channel();
        let request = PendingRequest {
            id,
            payload: payload.into(),
            responder,
        };
        let future = ResponseFuture {
            request_id: id,
            receiver,
        };
        self.metrics.record_request_submitted();

        if self.is_interrupted() {
            self.resolve(request, Err(TransportError::Interrupted));
            return future;
        }

        if let Some(evicted) = self.buffer.write(request) {
            let evicted_id = evicted.id;
            self.metrics.record_request_dropped();
            warn!(
                request_id = %evicted_id,
                capacity = self.buffer.capacity(),
                "Request buffer full, oldest request dropped"
            );
            evicted.complete(Err(TransportError::BufferOverflowDrop {
                request_id: evicted_id,
            }));
        }

        // An interrupt may have drained the queue between the check and the write.
        if self.is_interrupted() {
            self.drain_queue();
        }
        future
    }

    /// Reset the backoff after the host re-established connectivity itself.
    pub fn notify_reconnected(&self) {
        let previous = self.attempt.swap(1, Ordering::SeqCst);
        info!(previous_attempt = previous, "Reconnect signalled, backoff reset");
    }

    /// Attempt number the next reconnect will use.
    pub fn current_attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.shutdown.is_raised()
    }

    pub fn queue_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    fn resolve(&self, request: PendingRequest, result: Reply) {
        if result.is_ok() {
            self.metrics.record_request_completed();
        } else {
            self.metrics.record_request_failed();
        }
        let id = request.id;
        if !request.complete(result) {
            trace!(request_id = %id, "Caller dropped the future before completion");
        }
    }

    /// Complete the in-flight request unless an interrupt already failed it.
    fn finish_in_flight(&self, result: Reply) {
        let request = self.in_flight.lock().take();
        if let Some(request) = request {
            self.resolve(request, result);
        }
    }

    /// Fail every queued request with `Interrupted`.
    fn drain_queue(&self) -> usize {
        let mut drained = 0;
        while let Some(request) = self.buffer.try_read() {
            self.resolve(request, Err(TransportError::Interrupted));
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Queued requests failed on interrupt");
        }
        drained
    }

    fn acquire(&self) -> Result<Box<dyn Channel>, TransportError> {
        let channel = self.manager.acquire_channel(ROLE)?;
        self.status.set(ROLE, ChannelState::Connected);
        Ok(channel)
    }

    /// One round trip on the wire.
    fn exchange(
        &self,
        channel: &mut Option<Box<dyn Channel>>,
        id: RequestId,
        payload: &[u8],
    ) -> Result<Bytes, TransportError> {
        let handle = match channel.take() {
            Some(handle) => handle,
            None => self.acquire()?,
        };
        let handle = channel.insert(handle);

        let id_frame = id.to_be_bytes();
        handle.send_message(&[&id_frame[..], payload], SendMode::Blocking)?;
        self.status.set(ROLE, ChannelState::AwaitingReply);
        trace!(request_id = %id, len = payload.len(), "Request sent");

        if !self.await_reply(handle.as_mut())? {
            return Err(TransportError::ReplyTimeout {
                request_id: id,
                timeout_ms: self.reply_timeout.as_millis() as u64,
            });
        }

        let (reply_id, reply) = decode_reply(handle.recv_message()?)?;
        if reply_id != id {
            return Err(TransportError::ProtocolMismatch {
                expected: id,
                received: reply_id,
            });
        }
        Ok(reply)
    }

    /// Wait for a reply in slices so an interrupt ends the wait early.
    fn await_reply(&self, channel: &mut dyn Channel) -> Result<bool, TransportError> {
        let mut remaining = self.reply_timeout;
        loop {
            let slice = remaining.min(REPLY_POLL_SLICE);
            if channel.poll_readable(slice)? {
                return Ok(true);
            }
            if self.is_interrupted() {
                return Err(TransportError::Interrupted);
            }
            remaining = remaining.saturating_sub(slice);
            if remaining.is_zero() {
                return Ok(false);
            }
        }
    }

    fn handle_outcome(
        &self,
        channel: &mut Option<Box<dyn Channel>>,
        id: RequestId,
        result: Reply,
        mismatches: &mut u32,
    ) {
        match result {
            Ok(reply) => {
                *mismatches = 0;
                self.status.set(ROLE, ChannelState::Connected);
                if self.reset_backoff_on_success {
                    let previous = self.attempt.swap(1, Ordering::SeqCst);
                    if previous > 1 {
                        debug!(previous_attempt = previous, "Backoff reset after successful reply");
                    }
                }
                trace!(request_id = %id, len = reply.len(), "Reply matched");
                self.finish_in_flight(Ok(reply));
            }
            Err(err @ TransportError::ProtocolMismatch { .. }) => {
                *mismatches += 1;
                self.metrics.record_protocol_mismatch();
                warn!(request_id = %id, error = %err, consecutive = *mismatches, "Reply rejected");
                self.finish_in_flight(Err(err));

                if self.mismatch_threshold > 0 && *mismatches >= self.mismatch_threshold {
                    *mismatches = 0;
                    self.reconnect(channel);
                } else {
                    self.status.set(ROLE, ChannelState::Connected);
                }
            }
            Err(TransportError::Interrupted) => {
                debug!(request_id = %id, "Reply wait abandoned on interrupt");
                self.finish_in_flight(Err(TransportError::Interrupted));
            }
            Err(err) => {
                if matches!(err, TransportError::ReplyTimeout { .. }) {
                    self.metrics.record_reply_timeout();
                } else {
                    self.metrics.record_channel_error();
                }
                warn!(request_id = %id, error = %err, "Request failed");

                let replace = err.is_connectivity_failure() && !self.is_interrupted();
                self.finish_in_flight(Err(err));
                if replace {
                    *mismatches = 0;
                    self.reconnect(channel);
                }
            }
        }
    }

    /// Discard the current channel, back off and acquire a fresh one.
    fn reconnect(&self, channel: &mut Option<Box<dyn Channel>>) {
        if self.is_interrupted() {
            return;
        }
        self.status.set(ROLE, ChannelState::Reconnecting);
        if let Some(old) = channel.take() {
            self.manager.release_channel(ROLE, old);
        }
        self.metrics.record_reconnect();

        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        let delay = self.backoff.delay_for(attempt);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting request channel"
        );
        if self.clock.sleep_unless(delay, &self.shutdown) {
            debug!(attempt, "Backoff cut short by interrupt");
            return;
        }
        match self.acquire() {
            Ok(fresh) => *channel = Some(fresh),
            Err(err) => {
                self.metrics.record_channel_error();
                self.status.set(ROLE, ChannelState::Disconnected);
                warn!(error = %err, "Reconnect failed, retrying with the next request");
            }
        }
    }
}

impl WorkerLoop for RequestCorrelator {
    fn run(&self) {
        self.alive.store(true, Ordering::SeqCst);
        info!(
            capacity = self.buffer.capacity(),
            reply_timeout_ms = self.reply_timeout.as_millis() as u64,
            "Request correlator running"
        );

        let mut channel = match self.acquire() {
            Ok(handle) => Some(handle),
            Err(err) => {
                self.metrics.record_channel_error();
                self.status.set(ROLE, ChannelState::Disconnected);
                warn!(error = %err, "Initial request channel unavailable");
                None
            }
        };
        let mut mismatches = 0u32;

        while let Some(request) = self.buffer.read_blocking() {
            let id = request.id;
            let payload = request.payload.clone();
            {
                let mut slot = self.in_flight.lock();
                if self.is_interrupted() {
                    drop(slot);
                    self.resolve(request, Err(TransportError::Interrupted));
                    break;
                }
                *slot = Some(request);
            }

            let result = self.exchange(&mut channel, id, &payload);
            self.handle_outcome(&mut channel, id, result, &mut mismatches);

            if self.is_interrupted() {
                break;
            }
        }

        self.status.set(ROLE, ChannelState::Draining);
        if let Some(handle) = channel.take() {
            self.manager.release_channel(ROLE, handle);
        }
        self.finish_in_flight(Err(TransportError::Interrupted));
        self.drain_queue();
        self.alive.store(false, Ordering::SeqCst);
        info!("Request correlator stopped");
    }

    /// Stop the loop and fail the in-flight and every queued request.
    fn interrupt(&self) {
        if self.shutdown.raise() {
            info!("Request correlator interrupted");
        }
        self.buffer.close();
        self.status.set(ROLE, ChannelState::Draining);
        self.finish_in_flight(Err(TransportError::Interrupted));
        self.drain_queue();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "xt-request"
    }
}
