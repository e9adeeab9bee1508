//! Notifier
//!
//! Fire-and-forget push of state-change events. Publishing never blocks and
//! never fails the caller; a dropped event is recovered by the client
//! re-syncing from the authoritative session snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::ids::{ParticipantId, SessionId};
use crate::game::events::SessionEvent;

/// Default broadcast buffer.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Addressing for a published event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    /// Everyone following a session.
    Session(SessionId),
    /// One participant.
    Participant(ParticipantId),
}

impl Topic {
    /// Topic for an event: its session if it has one, otherwise `fallback`.
    pub fn for_event(event: &SessionEvent, fallback: &ParticipantId) -> Self {
        match event.session_id() {
            Some(id) => Topic::Session(id),
            None => Topic::Participant(fallback.clone()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Session(id) => write!(f, "session:{}", id),
            Topic::Participant(id) => write!(f, "participant:{}", id),
        }
    }
}

/// A published event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Where it goes.
    pub topic: Topic,
    /// What happened.
    pub event: SessionEvent,
}

/// Best-effort event sink.
pub trait Notifier: Send + Sync {
    /// Publish an event. Must not block or fail.
    fn publish(&self, topic: Topic, event: SessionEvent);
}

/// Notifier backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    /// Create with a buffer of `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every future notification.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: Topic, event: SessionEvent) {
        let name = event.name();
        if self.tx.send(Notification { topic: topic.clone(), event }).is_err() {
            debug!("No subscribers for {} on {}", name, topic);
        }
    }
}

/// Notifier that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn publish(&self, _topic: Topic, _event: SessionEvent) {}
}
