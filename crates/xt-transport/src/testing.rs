//! Centralized Testing Utilities
//!
//! Deterministic stand-ins for the driven ports: a manual clock and an
//! in-memory channel manager whose replies follow a per-role script and
//! whose inbound messages are published by the test.
//! Available with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use xt_transport::testing::{ManualClock, ReplyBehavior, ScriptedChannelManager};
//! use xt_transport::ChannelRole;
//!
//! let manager = ScriptedChannelManager::new();
//! manager.script(ChannelRole::Request, [ReplyBehavior::Silent, ReplyBehavior::Echo]);
//! ```

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{ChannelRole, RequestId, ShutdownSignal};
use crate::error::TransportError;
use crate::ports::outbound::{Channel, ChannelManager, Clock, SendMode};

// =============================================================================
// MANUAL CLOCK
// =============================================================================

/// A clock that only moves when told to.
///
/// `sleep` returns immediately, records the requested duration and advances
/// the clock by it. With auto-advance set, every `current_time_nanos` read
/// returns the current value and then moves the clock forward by the step.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_nanos: AtomicU64,
    auto_advance_nanos: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.now_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set_auto_advance(&self, step: Duration) {
        self.auto_advance_nanos
            .store(step.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for ManualClock {
    fn current_time_nanos(&self) -> u64 {
        let step = self.auto_advance_nanos.load(Ordering::SeqCst);
        self.now_nanos.fetch_add(step, Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        std::thread::yield_now();
    }

    /// Records and advances like `sleep`; an already raised signal ends it
    /// without advancing.
    fn sleep_unless(&self, duration: Duration, signal: &ShutdownSignal) -> bool {
        if signal.is_raised() {
            return true;
        }
        self.sleep(duration);
        signal.is_raised()
    }
}

// =============================================================================
// SCRIPTED CHANNELS
// =============================================================================

/// How a scripted channel answers the next message sent on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBehavior {
    /// Reply with the request's own id and payload.
    Echo,
    /// Reply with the request's id and this payload.
    Reply(Bytes),
    /// Reply with the payload under a different id.
    WrongId,
    /// Never reply; the poll reports a timeout at once.
    Silent,
    /// Never reply; the poll really waits out its timeout.
    Hang,
    /// The send itself fails with a broken pipe.
    FailSend,
    /// A non-blocking send reports a full channel.
    WouldBlock,
}

/// One message observed by the scripted manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub role: ChannelRole,
    /// Which acquired channel carried it, counting from 1 per role.
    pub channel_seq: usize,
    pub parts: Vec<Bytes>,
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: Mutex<HashMap<ChannelRole, VecDeque<ReplyBehavior>>>,
    defaults: Mutex<HashMap<ChannelRole, ReplyBehavior>>,
    acquire_failures: Mutex<HashMap<ChannelRole, usize>>,
    acquired: Mutex<HashMap<ChannelRole, usize>>,
    released: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
    inbound: Mutex<Inbound>,
    inbound_ready: Condvar,
}

/// Server-initiated traffic waiting to be read, per role.
#[derive(Debug, Default)]
struct Inbound {
    messages: HashMap<ChannelRole, VecDeque<Vec<Bytes>>>,
    /// Pending read failures, consumed one per poll.
    failures: HashMap<ChannelRole, usize>,
}

impl ScriptState {
    fn next_behavior(&self, role: ChannelRole) -> ReplyBehavior {
        if let Some(behavior) = self
            .scripts
            .lock()
            .get_mut(&role)
            .and_then(VecDeque::pop_front)
        {
            return behavior;
        }
        self.defaults
            .lock()
            .get(&role)
            .cloned()
            .unwrap_or(ReplyBehavior::Echo)
    }

    /// Wait up to `timeout` for an inbound message on `role`.
    fn wait_inbound(&self, role: ChannelRole, timeout: Duration) -> Result<bool, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut inbound = self.inbound.lock();
        loop {
            if let Some(remaining) = inbound.failures.get_mut(&role).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(
                    io::Error::new(io::ErrorKind::ConnectionReset, "scripted disconnect").into(),
                );
            }
            if inbound.messages.get(&role).is_some_and(|q| !q.is_empty()) {
                return Ok(true);
            }
            if self.inbound_ready.wait_until(&mut inbound, deadline).timed_out() {
                return Ok(false);
            }
        }
    }

    fn pop_inbound(&self, role: ChannelRole) -> Option<Vec<Bytes>> {
        self.inbound
            .lock()
            .messages
            .get_mut(&role)
            .and_then(VecDeque::pop_front)
    }
}

/// In-memory [`ChannelManager`] driven by per-role reply scripts.
///
/// Each message sent on a role's channel consumes the next scripted
/// behavior; once the script runs out the role's default applies
/// (`Echo` unless changed).
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannelManager {
    state: Arc<ScriptState>,
}

impl ScriptedChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behaviors for the next messages sent on `role`.
    pub fn script<I>(&self, role: ChannelRole, behaviors: I)
    where
        I: IntoIterator<Item = ReplyBehavior>,
    {
        self.state
            .scripts
            .lock()
            .entry(role)
            .or_default()
            .extend(behaviors);
    }

    pub fn set_default(&self, role: ChannelRole, behavior: ReplyBehavior) {
        self.state.defaults.lock().insert(role, behavior);
    }

    /// Make the next `count` acquires for `role` fail.
    pub fn fail_next_acquires(&self, role: ChannelRole, count: usize) {
        *self.state.acquire_failures.lock().entry(role).or_default() += count;
    }

    /// Successful acquires so far for `role`.
    pub fn acquired(&self, role: ChannelRole) -> usize {
        self.state.acquired.lock().get(&role).copied().unwrap_or(0)
    }

    pub fn released(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.sent.lock().clone()
    }

    pub fn sent_on(&self, role: ChannelRole) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.role == role).collect()
    }

    /// Queue a server-initiated message for whichever channel reads `role`.
    pub fn publish<'a, I>(&self, role: ChannelRole, parts: I)
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let message = parts.into_iter().map(Bytes::copy_from_slice).collect();
        self.state
            .inbound
            .lock()
            .messages
            .entry(role)
            .or_default()
            .push_back(message);
        self.state.inbound_ready.notify_all();
    }

    /// Make the next idle poll on `role` fail as if the peer went away.
    pub fn disconnect(&self, role: ChannelRole) {
        *self.state.inbound.lock().failures.entry(role).or_default() += 1;
        self.state.inbound_ready.notify_all();
    }
}

impl ChannelManager for ScriptedChannelManager {
    fn acquire_channel(&self, role: ChannelRole) -> Result<Box<dyn Channel>, TransportError> {
        {
            let mut failures = self.state.acquire_failures.lock();
            if let Some(remaining) = failures.get_mut(&role).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(TransportError::ChannelUnavailable {
                    role,
                    reason: "scripted acquire failure".to_string(),
                });
            }
        }

        let mut acquired = self.state.acquired.lock();
        let seq = acquired.entry(role).or_default();
        *seq += 1;
        Ok(Box::new(ScriptedChannel {
            role,
            seq: *seq,
            state: Arc::clone(&self.state),
            pending_reply: None,
        }))
    }

    fn release_channel(&self, _role: ChannelRole, _channel: Box<dyn Channel>) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedChannel {
    role: ChannelRole,
    seq: usize,
    state: Arc<ScriptState>,
    pending_reply: Option<PendingReply>,
}

enum PendingReply {
    Ready(Vec<Bytes>),
    Silent,
    Hang,
}

impl Channel for ScriptedChannel {
    fn send_message(&mut self, parts: &[&[u8]], mode: SendMode) -> Result<(), TransportError> {
        let behavior = self.state.next_behavior(self.role);
        match behavior {
            ReplyBehavior::FailSend => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted send failure").into())
            }
            ReplyBehavior::WouldBlock if mode == SendMode::DontWait => {
                return Err(io::Error::from(io::ErrorKind::WouldBlock).into())
            }
            _ => {}
        }

        let parts: Vec<Bytes> = parts.iter().map(|p| Bytes::copy_from_slice(p)).collect();
        self.state.sent.lock().push(SentMessage {
            role: self.role,
            channel_seq: self.seq,
            parts: parts.clone(),
        });

        // Push frames never get a reply.
        if parts.len() != 2 {
            return Ok(());
        }
        let id = parts[0].clone();
        let payload = parts[1].clone();
        self.pending_reply = Some(match behavior {
            ReplyBehavior::Echo => PendingReply::Ready(vec![id, payload]),
            ReplyBehavior::Reply(reply) => PendingReply::Ready(vec![id, reply]),
            ReplyBehavior::WrongId => {
                let other = RequestId::from_frame(&id)
                    .map(|id| RequestId::new(id.value().wrapping_add(1_000)))
                    .unwrap_or(RequestId::new(0));
                PendingReply::Ready(vec![Bytes::copy_from_slice(&other.to_be_bytes()), payload])
            }
            ReplyBehavior::Hang => PendingReply::Hang,
            ReplyBehavior::Silent | ReplyBehavior::FailSend | ReplyBehavior::WouldBlock => {
                PendingReply::Silent
            }
        });
        Ok(())
    }

    fn poll_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        match self.pending_reply {
            Some(PendingReply::Ready(_)) => Ok(true),
            Some(PendingReply::Hang) => {
                std::thread::sleep(timeout);
                Ok(false)
            }
            Some(PendingReply::Silent) => Ok(false),
            None => self.state.wait_inbound(self.role, timeout),
        }
    }

    fn recv_message(&mut self) -> Result<Vec<Bytes>, TransportError> {
        match self.pending_reply.take() {
            Some(PendingReply::Ready(parts)) => Ok(parts),
            None => self.state.pop_inbound(self.role).ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted message").into()
            }),
            _ => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted reply").into()),
        }
    }
}
