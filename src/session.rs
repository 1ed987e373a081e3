//! Session state: the binding of a transport connection to an optional
//! player entity, its subscription set, view radius, and liveness.
//!
//! Message dispatch lives on `WorldCore` (the single serialized mutation
//! surface); this module owns the bookkeeping; session records, the
//! [`Outbox`] that fans server messages out to per-connection channels,
//! and liveness/rate accounting.

use crate::protocol::ServerMessage;
use crate::types::{ChunkKey, EntityId, SessionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Routes server messages to per-session bounded channels.
///
/// `send` never blocks: a full or closed channel reports `false`, and the
/// caller treats that subscriber as stale (its stream is dropped; the
/// client resubscribes on its next activity).
#[derive(Clone, Default)]
pub struct Outbox {
    inner: Arc<Mutex<HashMap<SessionId, mpsc::Sender<ServerMessage>>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: impl Into<SessionId>, tx: mpsc::Sender<ServerMessage>) {
        self.inner.lock().insert(session.into(), tx);
    }

    pub fn unregister(&self, session: &str) {
        self.inner.lock().remove(session);
    }

    pub fn is_registered(&self, session: &str) -> bool {
        self.inner.lock().contains_key(session)
    }

    pub fn send(&self, session: &str, msg: ServerMessage) -> bool {
        let tx = match self.inner.lock().get(session) {
            Some(tx) => tx.clone(),
            None => return false,
        };
        tx.try_send(msg).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    pub client_id: SessionId,
    pub player: Option<EntityId>,
    /// Layer the bound player lives in; `default` until login.
    pub layer: String,
    pub subscriptions: HashSet<ChunkKey>,
    pub view_radius: f32,
    pub live: bool,
    pub last_activity: Instant,
    /// Previous movement command, for wall-clock dt derivation.
    pub last_move: Option<Instant>,
    window_start: Instant,
    window_count: u32,
}

impl Session {
    fn new(client_id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            client_id,
            player: None,
            layer: crate::layer::DEFAULT_LAYER.to_owned(),
            subscriptions: HashSet::new(),
            view_radius: 0.0,
            live: true,
            last_activity: now,
            last_move: None,
            window_start: now,
            window_count: 0,
        }
    }

    /// Sliding-window message accounting; `false` once the session exceeds
    /// its per-window budget.
    pub fn admit_message(&mut self, window: Duration, max_in_window: u32) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.window_count = 0;
        }
        self.window_count += 1;
        self.window_count <= max_in_window
    }
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    next_client: u64,
    server_id: String,
}

impl SessionManager {
    pub fn new() -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let digest = md5::compute(format!("atlas-world-{ts}"));
        Self {
            sessions: HashMap::new(),
            next_client: 0,
            server_id: format!("atlas-{:x}", digest)[..14].to_owned(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Allocate a session with a unique client id.
    pub fn connect(&mut self) -> SessionId {
        self.next_client += 1;
        let client_id = format!("client-{}", self.next_client);
        self.sessions
            .insert(client_id.clone(), Session::new(client_id.clone()));
        client_id
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn touch(&mut self, id: &str) {
        if let Some(s) = self.sessions.get_mut(id) {
            s.last_activity = Instant::now();
        }
    }

    pub fn live_ids(&self) -> HashSet<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.live)
            .map(|s| s.client_id.clone())
            .collect()
    }

    /// Sessions whose last activity is older than `timeout`.
    pub fn timed_out(&self, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.last_activity.elapsed() >= timeout)
            .map(|s| s.client_id.clone())
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.sessions.values().filter(|s| s.player.is_some()).count()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
