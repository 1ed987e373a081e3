//! Transport agent: WebSocket listener wrapping the world core.
//!
//! ## Responsibilities
//!
//! | Task | Cadence |
//! |---|---|
//! | Accept loop          | per connection                  |
//! | Session read/write   | per connection `tokio::select!` |
//! | Heartbeat pings      | `ws_heartbeat_ms`               |
//! | Tick loop            | `target_fps` (see `tick`)       |
//! | Chunk/session upkeep | `eviction_interval_ms`          |
//! | Auto-save            | `auto_save_interval_ms`         |
//!
//! Each frame is one JSON text message. The core itself is synchronous;
//! connection tasks lock it per message and the lock is never held across
//! a suspension point.

use crate::config::WorldConfig;
use crate::error::WorldError;
use crate::persist;
use crate::protocol::{parse_client_message, ServerMessage};
use crate::service::WorldCore;
use crate::tick::TickScheduler;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Outbound channel depth per connection; overflow marks the subscriber
/// stale instead of blocking the broadcaster.
const OUTBOUND_CHANNEL_DEPTH: usize = 256;

pub struct WorldServer {
    config: Arc<WorldConfig>,
    core: Arc<Mutex<WorldCore>>,
}

impl WorldServer {
    pub fn new(config: Arc<WorldConfig>, core: Arc<Mutex<WorldCore>>) -> Self {
        Self { config, core }
    }

    /// Bind, start the background tasks, and accept connections until
    /// ctrl-c. Saves the world on the way out.
    pub async fn run(self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("can't listen on {bind_addr:?}"))?;
        info!("Listening for websocket traffic on {bind_addr}");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = TickScheduler::new(Arc::clone(&self.config));
        let tick_handle = scheduler.spawn(Arc::clone(&self.core), shutdown_rx.clone());

        self.spawn_maintenance(shutdown_rx.clone());
        self.spawn_autosave(shutdown_rx);

        let connections = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, peer)) = accepted else { continue };
                    if connections.load(Ordering::Relaxed)
                        >= self.config.max_concurrent_connections
                    {
                        warn!("Refusing connection from {peer}: at capacity");
                        continue;
                    }
                    connections.fetch_add(1, Ordering::Relaxed);
                    let config = Arc::clone(&self.config);
                    let core = Arc::clone(&self.core);
                    let connections = Arc::clone(&connections);
                    tokio::spawn(async move {
                        debug!("New websocket connection from {peer}");
                        if let Err(e) = handle_connection(config, core, stream).await {
                            debug!("Connection {peer} ended: {e}");
                        }
                        connections.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down (SIGINT)");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        if let Some(handle) = tick_handle {
            let _ = handle.await;
        }
        self.save_now("shutdown save");
        Ok(())
    }

    fn spawn_maintenance(&self, mut shutdown: watch::Receiver<bool>) {
        let core = Arc::clone(&self.core);
        let interval = self.config.eviction_interval();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => core.lock().run_maintenance(),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_autosave(&self, mut shutdown: watch::Receiver<bool>) {
        if self.config.auto_save_interval_ms == 0 {
            return;
        }
        let core = Arc::clone(&self.core);
        let interval = self.config.auto_save_interval();
        let path = persist::save_path(&self.config.data_directory);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let doc = core.lock().save_document();
                        let path = path.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            persist::write_to(&path, &doc)
                        })
                        .await;
                        match result {
                            Ok(Ok(())) => debug!("Auto-saved world"),
                            Ok(Err(e)) => warn!("Auto-save failed: {e}"),
                            Err(e) => warn!("Auto-save task failed: {e}"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn save_now(&self, label: &str) {
        let doc = self.core.lock().save_document();
        let path = persist::save_path(&self.config.data_directory);
        match persist::write_to(&path, &doc) {
            Ok(()) => info!("{label} written to {}", path.display()),
            Err(e) => warn!("{label} failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection task
// ---------------------------------------------------------------------------

async fn handle_connection(
    config: Arc<WorldConfig>,
    core: Arc<Mutex<WorldCore>>,
    stream: TcpStream,
) -> Result<()> {
    let ws_stream = accept_async(stream).await.context("websocket handshake")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CHANNEL_DEPTH);
    let client_id = core.lock().connect(tx);

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval());
    heartbeat.tick().await; // skip the immediate first tick

    let close_reason = loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_frame(&config, &core, &client_id, &text)
                        {
                            core.lock().outbox().send(&client_id, reply);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_sender.send(Message::Pong(payload)).await.is_err() {
                            break "write failed";
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        core.lock().sessions.touch(&client_id);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let err =
                            WorldError::InvalidMessage("binary frames not supported".to_owned());
                        core.lock().outbox().send(&client_id, err.to_reply());
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed by client",
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Read error on {client_id}: {e}");
                        break "read error";
                    }
                }
            }
            outbound = rx.recv() => {
                let Some(msg) = outbound else { break "outbox dropped" };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to serialize server message: {e}");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break "write failed";
                }
            }
            _ = heartbeat.tick() => {
                if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break "heartbeat failed";
                }
            }
        }
    };

    core.lock().disconnect(&client_id, close_reason);
    Ok(())
}

/// Transport-level checks for one text frame, then dispatch into the core.
/// Returns an error reply to send, if any.
fn handle_frame(
    config: &WorldConfig,
    core: &Arc<Mutex<WorldCore>>,
    client_id: &str,
    text: &str,
) -> Option<ServerMessage> {
    if text.len() > config.max_message_size {
        let err = WorldError::InvalidMessage(format!(
            "message exceeds {} bytes",
            config.max_message_size
        ));
        return Some(err.to_reply());
    }

    {
        let mut core = core.lock();
        let window = std::time::Duration::from_millis(config.rate_limit_window_ms.max(1));
        let budget = config
            .max_messages_per_second
            .max(config.rate_limit_max_requests);
        if let Some(session) = core.sessions.get_mut(client_id) {
            if !session.admit_message(window, budget) {
                let err = WorldError::Forbidden("rate limit exceeded".to_owned());
                return Some(err.to_reply());
            }
        }
    }

    match parse_client_message(text) {
        Ok(msg) => {
            core.lock().handle_message(client_id, msg);
            None
        }
        Err(e) => Some(ServerMessage::error(e.code, e.message)),
    }
}
