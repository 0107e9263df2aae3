//! Event fan-out from the session registry to UI surfaces.
//!
//! Every surface holds one [`Subscription`] and sees events for every
//! session. Each subscriber has its own unbounded queue, so publishing never
//! blocks a driver's read loop and a slow surface never stalls another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::session::{SessionId, SessionStatus};

pub type SubscriberId = u64;

/// Events sent from the registry to UI surfaces, serialized as tagged JSON.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum BridgeEvent {
    /// A chunk of driver output. `offset` is the stream position of its
    /// first byte.
    Data {
        id: SessionId,
        data: Vec<u8>,
        offset: u64,
    },
    /// The driver ended. No `Data` for this session follows.
    Exit {
        id: SessionId,
        exit_code: Option<u32>,
        signal: Option<String>,
    },
    /// The session failed; the pane should show `message`.
    Error { id: SessionId, message: String },
    /// Metadata changed. Only the changed fields are present.
    Label {
        id: SessionId,
        label: Option<String>,
        host: Option<String>,
        port: Option<u16>,
    },
    Status {
        id: SessionId,
        status: SessionStatus,
    },
    /// Scrollback replay for a single subscriber on attach. Replaces the
    /// surface's terminal contents.
    Hydrate { id: SessionId, data: Vec<u8> },
}

impl BridgeEvent {
    pub fn session_id(&self) -> &str {
        match self {
            BridgeEvent::Data { id, .. }
            | BridgeEvent::Exit { id, .. }
            | BridgeEvent::Error { id, .. }
            | BridgeEvent::Label { id, .. }
            | BridgeEvent::Status { id, .. }
            | BridgeEvent::Hydrate { id, .. } => id,
        }
    }
}

type Senders = HashMap<SubscriberId, mpsc::UnboundedSender<BridgeEvent>>;

#[derive(Default)]
struct BridgeInner {
    subscribers: RwLock<Senders>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to the subscriber table.
#[derive(Clone, Default)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        log::debug!("bridge subscriber {id} added");
        Subscription {
            id,
            bridge: self.clone(),
            rx,
            closed: false,
        }
    }

    /// Remove a subscriber. Safe to call any number of times.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let removed = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            log::debug!("bridge subscriber {id} removed");
        }
    }

    /// Send `event` to every subscriber.
    pub fn publish(&self, event: BridgeEvent) {
        let mut dead = Vec::new();
        {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in subscribers.iter() {
                if tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.unsubscribe(id);
        }
    }

    /// Send `event` to one subscriber. Returns `false` if it is gone.
    pub fn deliver(&self, subscriber: SubscriberId, event: BridgeEvent) -> bool {
        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers
            .get(&subscriber)
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A surface's view of the bridge. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    bridge: Bridge,
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
    closed: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        if self.closed {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop delivery. Events still queued are discarded, so nothing is
    /// observed after this returns.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.bridge.unsubscribe(self.id);
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
