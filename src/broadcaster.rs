//! Broadcaster - fan-out of events to connected observers
//!
//! Every observer gets its own bounded outbound queue. An event is serialized
//! once and the resulting payload is offered to every queue with `try_send`,
//! so a slow or dead observer only ever loses its own copy and never holds up
//! the producer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::actors::messages::Event;

/// Serialized event, shared between all observer queues
pub type Payload = Arc<str>;

/// Number of undelivered payloads an observer may have queued
pub const OBSERVER_QUEUE_SIZE: usize = 64;

/// Identity of a connected observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a payload did not reach an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("observer queue is full")]
    Full,

    #[error("observer is gone")]
    Closed,
}

/// Registry of connected observers
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    observers: Arc<RwLock<HashMap<ObserverId, mpsc::Sender<Payload>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new observer
    ///
    /// Returns its id and the receiving end of its outbound queue.
    pub async fn register(&self) -> (ObserverId, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(OBSERVER_QUEUE_SIZE);
        let id = ObserverId::new();

        self.observers.write().await.insert(id, tx);
        debug!(observer = %id, "observer registered");

        (id, rx)
    }

    /// Remove an observer; unknown ids are ignored
    pub async fn unregister(&self, id: ObserverId) {
        if self.observers.write().await.remove(&id).is_some() {
            debug!(observer = %id, "observer unregistered");
        }
    }

    /// Number of registered observers
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Deliver `event` to every registered observer
    ///
    /// Returns how many observers accepted it. Delivery failures are logged
    /// and otherwise ignored.
    pub async fn broadcast(&self, event: &Event) -> usize {
        let Some(payload) = serialize(event) else {
            return 0;
        };

        let observers = self.observers.read().await;
        let mut delivered = 0;

        for (id, sender) in observers.iter() {
            match deliver(sender, &payload) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(observer = %id, kind = event.kind(), "dropping event: {e}"),
            }
        }

        trace!(
            kind = event.kind(),
            "broadcast to {delivered}/{} observers",
            observers.len()
        );
        delivered
    }

    /// Deliver `event` to a single observer
    pub async fn send_to(&self, id: ObserverId, event: &Event) -> Result<(), DeliveryError> {
        let payload = serialize(event).ok_or(DeliveryError::Closed)?;

        let observers = self.observers.read().await;
        let sender = observers.get(&id).ok_or(DeliveryError::Closed)?;

        deliver(sender, &payload).inspect_err(|e| {
            debug!(observer = %id, kind = event.kind(), "dropping event: {e}");
        })
    }

    /// Drop every observer queue
    ///
    /// Used during shutdown; each connection notices its queue closing and
    /// terminates.
    pub async fn close_all(&self) {
        let mut observers = self.observers.write().await;
        let count = observers.len();
        observers.clear();
        debug!(count, "closed all observers");
    }
}

fn serialize(event: &Event) -> Option<Payload> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Payload::from(text)),
        Err(e) => {
            error!(kind = event.kind(), "failed to serialize event: {e}");
            None
        }
    }
}

fn deliver(sender: &mpsc::Sender<Payload>, payload: &Payload) -> Result<(), DeliveryError> {
    sender.try_send(payload.clone()).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
        mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
    })
}
