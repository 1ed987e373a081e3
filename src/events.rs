//! Developer event hub.
//!
//! Modules publish structured [`DevEvent`]s to a broadcast channel;
//! diagnostic consumers (log taps, test probes) subscribe. The hub is an
//! explicit dependency injected at construction; it lives for the process
//! and is dropped after the last session disconnects at shutdown.

use crate::types::{ChunkKey, EntityId, SessionId, Vec3};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DevEvent {
    SessionConnected {
        session: SessionId,
    },
    SessionClosed {
        session: SessionId,
        reason: String,
    },
    EntitySpawned {
        entity: EntityId,
        layer: String,
        position: Vec3,
    },
    EntityDestroyed {
        entity: EntityId,
        cause: String,
    },
    Damage {
        entity: EntityId,
        amount: f32,
        remaining: f32,
    },
    Heal {
        entity: EntityId,
        amount: f32,
    },
    ChunkLoaded {
        key: ChunkKey,
    },
    ChunkUnloaded {
        key: ChunkKey,
    },
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<DevEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish; having no subscribers is normal and not an error.
    pub fn publish(&self, event: DevEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DevEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
