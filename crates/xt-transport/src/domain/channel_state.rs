//! Channel roles, the per-channel state machine and the status board that
//! makes it observable.
//!
//! # Request channel states
//!
//! ```text
//!             send ok            reply matched
//!  CONNECTED ─────────► AWAITING_REPLY ─────────► CONNECTED
//!      ▲                      │
//!      │  fresh channel       │ timeout / I/O error
//!      └────── RECONNECTING ◄─┘
//!
//!  any ── interrupt ──► DRAINING (final)
//! ```
//!
//! The push and subscribe channels only move between `Connected`,
//! `Reconnecting` and `Disconnected`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logical communication path owned by one worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    /// Two-part request/reply channel.
    Request,
    /// Single-frame fire-and-forget channel.
    Push,
    /// Inbound `[key, payload]` updates from the server.
    Subscribe,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Request => write!(f, "request"),
            ChannelRole::Push => write!(f, "push"),
            ChannelRole::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// Observable state of a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No handle acquired yet, or the last acquire failed.
    Disconnected,
    Connected,
    /// A request is on the wire and its reply is awaited.
    AwaitingReply,
    /// The handle was discarded; backing off before acquiring a new one.
    Reconnecting,
    /// Shut down; queued work is being failed.
    Draining,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::AwaitingReply => write!(f, "awaiting-reply"),
            ChannelState::Reconnecting => write!(f, "reconnecting"),
            ChannelState::Draining => write!(f, "draining"),
        }
    }
}

/// Latest state per channel role.
#[derive(Debug, Default)]
pub struct ChannelStatusBoard {
    states: RwLock<HashMap<ChannelRole, ChannelState>>,
    transitions: AtomicU64,
}

impl ChannelStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `state` for `role`. Returns the previous state if it changed.
    pub fn set(&self, role: ChannelRole, state: ChannelState) -> Option<ChannelState> {
        let mut states = self.states.write();
        let previous = states.insert(role, state);
        if previous == Some(state) {
            return None;
        }
        self.transitions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            role = %role,
            from = ?previous,
            to = %state,
            "Channel state changed"
        );
        previous
    }

    /// Current state; roles never reported are `Disconnected`.
    pub fn get(&self, role: ChannelRole) -> ChannelState {
        self.states
            .read()
            .get(&role)
            .copied()
            .unwrap_or(ChannelState::Disconnected)
    }

    pub fn snapshot(&self) -> HashMap<ChannelRole, ChannelState> {
        self.states.read().clone()
    }

    /// Total number of state changes recorded.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }
}
