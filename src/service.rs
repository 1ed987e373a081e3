//! WorldCore – the composition root and single serialized mutation surface.
//!
//! Every subsystem (store, layers, chunks, movement, durability,
//! archetypes, sessions) is owned here; sessions, the tick loop, and
//! maintenance all mutate the world through `&mut WorldCore`, which the
//! server wraps in one `Arc<Mutex<…>>`. That lock is the one-at-a-time
//! executor: simulation logic never suspends, and ordering within a
//! session follows receive order.
//!
//! ## Mutation discipline
//!
//! Position writes go through [`WorldCore::apply_mobility`] so chunk
//! membership is always recomputed from the new position and the right
//! deltas fan out. Nothing stores an entity→chunk pointer.

use crate::archetype::{player_contracts, ArchetypeCatalog, PLAYER_ARCHETYPE};
use crate::chunk::ChunkManager;
use crate::config::WorldConfig;
use crate::contract::{Contract, ContractKind, SchemaRegistry};
use crate::durability::DurabilitySystem;
use crate::error::{Result, WorldError};
use crate::events::{DevEvent, EventHub};
use crate::layer::{LayerRegistry, DEFAULT_LAYER};
use crate::movement::{MoveOutcome, MovementSystem};
use crate::protocol::{ClientMessage, Direction, ServerMessage};
use crate::session::{Outbox, SessionManager};
use crate::spatial::{neighbors, world_to_chunk};
use crate::store::EntityStore;
use crate::types::{ChunkKey, EntityId, SessionId, Vec3, WorldStats};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

pub struct WorldCore {
    config: Arc<WorldConfig>,
    pub store: EntityStore,
    pub layers: LayerRegistry,
    pub chunks: ChunkManager,
    pub movement: MovementSystem,
    pub durability: DurabilitySystem,
    pub archetypes: ArchetypeCatalog,
    pub sessions: SessionManager,
    pub events: EventHub,
    outbox: Outbox,
    tick_count: u64,
    tick_errors: u64,
    pub(crate) player_counter: u64,
}

impl WorldCore {
    pub fn new(config: Arc<WorldConfig>, outbox: Outbox, events: EventHub) -> Self {
        let mut store = EntityStore::new(SchemaRegistry::new());
        let durability = DurabilitySystem::new();
        durability.install_hooks(&mut store);

        Self {
            store,
            layers: LayerRegistry::new(config.chunk_size, config.gravity),
            chunks: ChunkManager::new(Arc::clone(&config), outbox.clone()),
            movement: MovementSystem::new(Arc::clone(&config)),
            durability,
            archetypes: ArchetypeCatalog::new(),
            sessions: SessionManager::new(),
            events,
            outbox,
            config,
            tick_count: 0,
            tick_errors: 0,
            player_counter: 0,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // -----------------------------------------------------------------------
    // Entity operations
    // -----------------------------------------------------------------------

    /// Chunk derived from the entity's current position, if it has one.
    pub fn chunk_key_of(&self, id: &str) -> Option<ChunkKey> {
        let position = self.store.position(id)?;
        let layer = self.layers.entity_layer(id);
        let size = self.layers.chunk_size_of(layer);
        let (cx, cy, cz) = world_to_chunk(position, size);
        Some(ChunkKey::new(layer, cx, cy, cz))
    }

    /// Ensure a chunk is loaded, announcing fresh loads on the event hub.
    fn load_chunk(&mut self, key: &ChunkKey) {
        if self.chunks.load(key, &mut self.store, &mut self.layers) {
            self.events.publish(DevEvent::ChunkLoaded { key: key.clone() });
        }
    }

    /// Spawn an entity from an archetype into a layer.
    pub fn spawn(
        &mut self,
        archetype_id: &str,
        layer_id: &str,
        position: Vec3,
        overrides: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<EntityId> {
        if !self.layers.contains(layer_id) {
            return Err(WorldError::UnknownLayer(layer_id.to_owned()));
        }

        let id = self.archetypes.next_id(archetype_id);
        let contracts = self
            .archetypes
            .clone_contracts(archetype_id, &id, position, overrides)?;
        self.store.create(&id, contracts)?;
        if archetype_id == PLAYER_ARCHETYPE {
            self.player_counter += 1;
        }
        self.register_spawned(&id, layer_id, position);
        Ok(id)
    }

    fn register_spawned(&mut self, id: &str, layer_id: &str, position: Vec3) {
        self.layers.set_entity_layer(id, layer_id);
        if let Some(key) = self.chunk_key_of(id) {
            self.load_chunk(&key);
            self.chunks.add_entity(id, &key, &self.store);
            let contracts = self.store.contracts(id).map(<[_]>::to_vec).unwrap_or_default();
            self.chunks.broadcast(
                &key,
                ServerMessage::EntitySpawn {
                    entity_id: id.to_owned(),
                    contracts,
                    chunk_key: key.clone(),
                },
            );
        }
        self.events.publish(DevEvent::EntitySpawned {
            entity: id.to_owned(),
            layer: layer_id.to_owned(),
            position,
        });
        debug!("Spawned {id} in {layer_id} at {position}");
    }

    /// Destroy an entity: destroy observers fire while it is still in the
    /// store, then the store record, chunk membership, and layer index go,
    /// with `entity_remove` delta + `entity_despawn` fan-out.
    pub fn despawn(&mut self, id: &str, cause: &str) -> bool {
        if !self.store.contains(id) {
            return false;
        }
        let key = self.chunk_key_of(id);

        self.durability.record_destroy(id, cause);
        self.events.publish(DevEvent::EntityDestroyed {
            entity: id.to_owned(),
            cause: cause.to_owned(),
        });

        self.store.remove(id);
        self.layers.forget_entity(id);
        if let Some(key) = key {
            self.chunks.remove_entity(id, &key);
            self.chunks.broadcast(
                &key,
                ServerMessage::EntityDespawn {
                    entity_id: id.to_owned(),
                    chunk_key: key.clone(),
                },
            );
        }
        debug!("Despawned {id} ({cause})");
        true
    }

    /// Add a contract to an entity, keeping chunk membership and
    /// subscribers in sync.
    pub fn add_contract_to(&mut self, id: &str, contract: Contract) -> Result<()> {
        if contract.kind() == ContractKind::Mobility {
            return self.apply_mobility(id, contract);
        }
        self.store.add(id, contract)?;
        if let Some(key) = self.chunk_key_of(id) {
            self.chunks.entity_updated(&key, id, &self.store);
        }
        Ok(())
    }

    /// Remove every contract of a kind from an entity.
    pub fn remove_contract_from(&mut self, id: &str, kind: ContractKind) -> bool {
        let old_key = self.chunk_key_of(id);
        if !self.store.remove_contract(id, kind) {
            return false;
        }
        match (kind, old_key) {
            // Losing mobility removes the entity from space entirely.
            (ContractKind::Mobility, Some(key)) => self.chunks.remove_entity(id, &key),
            (_, Some(key)) => self.chunks.entity_updated(&key, id, &self.store),
            _ => {}
        }
        true
    }

    /// The single position write path: replace mobility, recompute the
    /// owning chunk from the new position, and emit membership/update
    /// deltas.
    pub fn apply_mobility(&mut self, id: &str, mobility: Contract) -> Result<()> {
        debug_assert_eq!(mobility.kind(), ContractKind::Mobility);
        let old_key = self.chunk_key_of(id);
        self.store.add(id, mobility)?;
        let new_key = self.chunk_key_of(id);

        match (old_key, new_key) {
            (Some(old), Some(new)) if old == new => {
                self.chunks.entity_updated(&new, id, &self.store);
            }
            (Some(old), Some(new)) => {
                self.load_chunk(&new);
                self.chunks.move_entity(id, &old, &new, &self.store);
            }
            (None, Some(new)) => {
                self.load_chunk(&new);
                self.chunks.add_entity(id, &new, &self.store);
            }
            (Some(old), None) => self.chunks.remove_entity(id, &old),
            (None, None) => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Movement surface
    // -----------------------------------------------------------------------

    /// Authoritative move: sweep, then write back the (possibly clamped)
    /// position even when blocked.
    pub fn apply_move(&mut self, id: &str, want: Vec3, dt: f32) -> MoveOutcome {
        let outcome = self
            .movement
            .attempt_move(&self.store, &self.chunks, &self.layers, id, want, dt);

        if let Some(Contract::Mobility {
            velocity,
            max_speed,
            acceleration,
            ..
        }) = self.store.get(id, ContractKind::Mobility).cloned()
        {
            let updated = Contract::Mobility {
                position: outcome.position,
                velocity,
                max_speed,
                acceleration,
            };
            if let Err(e) = self.apply_mobility(id, updated) {
                warn!("Move write-back failed for {id}: {e}");
            }
        }
        outcome
    }

    pub fn teleport(&mut self, id: &str, destination: Vec3) -> MoveOutcome {
        match self
            .movement
            .teleport(&self.store, &self.chunks, &self.layers, id, destination)
        {
            Ok(mobility) => {
                if let Err(e) = self.apply_mobility(id, mobility) {
                    warn!("Teleport write-back failed for {id}: {e}");
                }
                MoveOutcome {
                    ok: true,
                    position: destination,
                    blocked_reason: None,
                    collision_normal: None,
                }
            }
            Err(outcome) => outcome,
        }
    }

    pub fn set_velocity(&mut self, id: &str, velocity: Vec3) -> Result<()> {
        let mobility = self
            .movement
            .with_velocity(&self.store, id, velocity)
            .ok_or_else(|| WorldError::UnknownEntity(id.to_owned()))?;
        self.apply_mobility(id, mobility)
    }

    pub fn apply_impulse(&mut self, id: &str, impulse: Vec3) -> Result<()> {
        let mobility = self
            .movement
            .with_impulse(&self.store, id, impulse)
            .ok_or_else(|| WorldError::UnknownEntity(id.to_owned()))?;
        self.apply_mobility(id, mobility)
    }

    // -----------------------------------------------------------------------
    // Durability surface
    // -----------------------------------------------------------------------

    pub fn damage(&mut self, id: &str, amount: f32, source: Option<&str>) -> Result<bool> {
        let applied = self.durability.damage(&mut self.store, id, amount, source)?;
        if !applied {
            return Ok(false);
        }
        let remaining = match self.store.get(id, ContractKind::Durability) {
            Some(Contract::Durability { health, .. }) => *health,
            _ => 0.0,
        };
        self.events.publish(DevEvent::Damage {
            entity: id.to_owned(),
            amount,
            remaining,
        });
        if remaining <= 0.0 {
            self.despawn(id, "destroyed");
        } else if let Some(key) = self.chunk_key_of(id) {
            self.chunks.entity_updated(&key, id, &self.store);
        }
        Ok(true)
    }

    pub fn heal(&mut self, id: &str, amount: f32) -> Result<bool> {
        let applied = self.durability.heal(&mut self.store, id, amount)?;
        if applied {
            self.events.publish(DevEvent::Heal {
                entity: id.to_owned(),
                amount,
            });
            if let Some(key) = self.chunk_key_of(id) {
                self.chunks.entity_updated(&key, id, &self.store);
            }
        }
        Ok(applied)
    }

    pub fn repair(&mut self, id: &str) -> Result<bool> {
        let applied = self.durability.repair(&mut self.store, id)?;
        if applied {
            if let Some(key) = self.chunk_key_of(id) {
                self.chunks.entity_updated(&key, id, &self.store);
            }
        }
        Ok(applied)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// One simulation step: movement integration, then durability.
    /// Internal errors are logged and counted, never propagated.
    pub fn tick(&mut self, dt: f32) {
        self.tick_count += 1;

        let updates = self
            .movement
            .integrate(&self.store, &self.chunks, &self.layers, dt);
        for (id, mobility) in updates {
            if let Err(e) = self.apply_mobility(&id, mobility) {
                self.tick_errors += 1;
                warn!("Tick integration write-back failed for {id}: {e}");
            }
        }

        let dead = self.durability.tick(&mut self.store);
        for id in dead {
            self.despawn(&id, "health depleted");
        }
    }

    pub fn tick_errors(&self) -> u64 {
        self.tick_errors
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Allocate a session, register its outbound channel, and greet it
    /// with `hello_ok`.
    pub fn connect(&mut self, tx: tokio::sync::mpsc::Sender<ServerMessage>) -> SessionId {
        let client_id = self.sessions.connect();
        self.outbox.register(&client_id, tx);
        self.outbox.send(
            &client_id,
            ServerMessage::HelloOk {
                client_id: client_id.clone(),
                server_id: self.sessions.server_id().to_owned(),
                server_version: env!("CARGO_PKG_VERSION").to_owned(),
            },
        );
        self.events.publish(DevEvent::SessionConnected {
            session: client_id.clone(),
        });
        info!("Session {client_id} connected");
        client_id
    }

    /// Tear a session down: despawn its player, drop every subscription,
    /// unregister its channel.
    pub fn disconnect(&mut self, session_id: &str, reason: &str) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        if let Some(player) = &session.player {
            self.despawn(player, "logout");
        }
        self.chunks.unsubscribe_all(session_id);
        self.outbox.unregister(session_id);
        self.events.publish(DevEvent::SessionClosed {
            session: session_id.to_owned(),
            reason: reason.to_owned(),
        });
        info!("Session {session_id} closed ({reason})");
    }

    // -----------------------------------------------------------------------
    // Message dispatch
    // -----------------------------------------------------------------------

    /// Process one inbound message: capability gating, then per-command
    /// handling. All replies and broadcasts go through the outbox.
    pub fn handle_message(&mut self, session_id: &str, msg: ClientMessage) {
        self.sessions.touch(session_id);
        if self.sessions.get(session_id).is_none() {
            return;
        }

        // `hello` is pure handshake and bypasses gating.
        if let ClientMessage::Hello { .. } = msg {
            let reply = ServerMessage::HelloOk {
                client_id: session_id.to_owned(),
                server_id: self.sessions.server_id().to_owned(),
                server_version: env!("CARGO_PKG_VERSION").to_owned(),
            };
            self.outbox.send(session_id, reply);
            return;
        }

        let command = msg.command_name();
        if let Err(e) = self.authorize(session_id, command) {
            self.outbox.send(session_id, e.to_reply());
            return;
        }

        match msg {
            ClientMessage::Hello { .. } => unreachable!("handled above"),
            ClientMessage::Login {
                layer_id,
                player_name,
            } => self.handle_login(session_id, layer_id, player_name),
            ClientMessage::Logout {} => self.handle_logout(session_id),
            ClientMessage::SetView { radius } => self.handle_set_view(session_id, radius),
            ClientMessage::SubscribeChunks { chunk_keys } => {
                self.handle_subscribe(session_id, chunk_keys)
            }
            ClientMessage::UnsubscribeChunks { chunk_keys } => {
                self.handle_unsubscribe(session_id, chunk_keys)
            }
            ClientMessage::Move { want } => self.handle_move(session_id, want),
            ClientMessage::MoveDir { directions } => self.handle_move_dir(session_id, directions),
            ClientMessage::AddContract {
                entity_id,
                contract,
            } => self.handle_add_contract(session_id, entity_id, contract),
            ClientMessage::RemoveContract {
                entity_id,
                contract_type,
            } => self.handle_remove_contract(session_id, entity_id, contract_type),
            ClientMessage::Interact { action, .. } => {
                self.outbox.send(
                    session_id,
                    ServerMessage::error(
                        "NOT_IMPLEMENTED",
                        format!("interact '{action}' is not implemented"),
                    ),
                );
            }
        }
    }

    /// Capability gating: the world's `world_commands` allow-list (if any
    /// such contract exists in the session's layer), then the bound-player
    /// requirement, then the player's `command_access`.
    fn authorize(&self, session_id: &str, command: &str) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| WorldError::InvalidMessage("no such session".to_owned()))?;

        if !self.world_allows(&session.layer, command) {
            return Err(WorldError::Forbidden(format!(
                "command '{command}' is not enabled in this world"
            )));
        }

        let Some(player) = &session.player else {
            if command == "login" {
                return Ok(());
            }
            return Err(WorldError::NotAuthenticated);
        };

        if let Some(Contract::CommandAccess { commands }) =
            self.store.get(player, ContractKind::CommandAccess)
        {
            if !commands.iter().any(|c| c == command) {
                return Err(WorldError::PermissionDenied(format!(
                    "command '{command}' is not granted to this player"
                )));
            }
        }
        Ok(())
    }

    /// A command is allowed unless some entity in the layer advertises a
    /// `world_commands` allow-list that omits it.
    fn world_allows(&self, layer: &str, command: &str) -> bool {
        let holders: Vec<EntityId> = self
            .store
            .list_with(ContractKind::WorldCommands)
            .into_iter()
            .filter(|id| self.layers.entity_layer(id) == layer)
            .collect();
        if holders.is_empty() {
            return true;
        }
        holders.iter().any(|id| {
            matches!(
                self.store.get(id, ContractKind::WorldCommands),
                Some(Contract::WorldCommands { commands }) if commands.iter().any(|c| c == command)
            )
        })
    }

    // -----------------------------------------------------------------------
    // Command handlers
    // -----------------------------------------------------------------------

    fn handle_login(
        &mut self,
        session_id: &str,
        layer_id: Option<String>,
        player_name: Option<String>,
    ) {
        let layer_id = layer_id.unwrap_or_else(|| DEFAULT_LAYER.to_owned());

        // Already bound: idempotent re-ack.
        if let Some(session) = self.sessions.get(session_id) {
            if let Some(player) = session.player.clone() {
                let reply = ServerMessage::LoginOk {
                    player_id: player,
                    layer_id: session.layer.clone(),
                };
                self.outbox.send(session_id, reply);
                return;
            }
        }

        let Some(layer) = self.layers.get(&layer_id) else {
            let err = WorldError::UnknownLayer(layer_id.clone());
            self.outbox.send(session_id, err.to_reply());
            return;
        };
        let spawn_point = layer.spawn_point;

        let player_id = self.archetypes.next_id(PLAYER_ARCHETYPE);
        let contracts = player_contracts(&player_id, player_name, spawn_point);
        if let Err(e) = self.store.create(&player_id, contracts) {
            self.outbox.send(session_id, e.to_reply());
            return;
        }
        self.player_counter += 1;
        self.register_spawned(&player_id, &layer_id, spawn_point);

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.player = Some(player_id.clone());
            session.layer = layer_id.clone();
        }
        self.outbox.send(
            session_id,
            ServerMessage::LoginOk {
                player_id,
                layer_id,
            },
        );
        self.refresh_subscriptions(session_id);
    }

    fn handle_logout(&mut self, session_id: &str) {
        let player = self
            .sessions
            .get_mut(session_id)
            .and_then(|s| s.player.take());
        if let Some(player) = player {
            self.despawn(&player, "logout");
        }

        let subscriptions: Vec<ChunkKey> = self
            .sessions
            .get_mut(session_id)
            .map(|s| s.subscriptions.drain().collect())
            .unwrap_or_default();
        for key in subscriptions {
            self.chunks.unsubscribe(session_id, &key);
        }

        self.outbox.send(session_id, ServerMessage::LogoutOk {});
    }

    fn handle_set_view(&mut self, session_id: &str, radius: f32) {
        if !radius.is_finite() || radius < 0.0 {
            let err = WorldError::InvalidMessage("set_view.radius must be >= 0".to_owned());
            self.outbox.send(session_id, err.to_reply());
            return;
        }
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.view_radius = radius;
        }
        self.refresh_subscriptions(session_id);
        self.outbox
            .send(session_id, ServerMessage::SetViewOk { radius });
    }

    fn handle_subscribe(&mut self, session_id: &str, keys: Vec<ChunkKey>) {
        let current = self
            .sessions
            .get(session_id)
            .map(|s| s.subscriptions.len())
            .unwrap_or(0);
        if current + keys.len() > self.config.max_subs_per_client {
            let err = WorldError::Forbidden("subscription limit reached".to_owned());
            self.outbox.send(session_id, err.to_reply());
            return;
        }

        for key in keys {
            self.load_chunk(&key);
            self.chunks.subscribe(session_id, &key, &self.store);
            if let Some(session) = self.sessions.get_mut(session_id) {
                session.subscriptions.insert(key);
            }
        }
    }

    fn handle_unsubscribe(&mut self, session_id: &str, keys: Vec<ChunkKey>) {
        for key in keys {
            self.chunks.unsubscribe(session_id, &key);
            if let Some(session) = self.sessions.get_mut(session_id) {
                session.subscriptions.remove(&key);
            }
        }
    }

    fn handle_move(&mut self, session_id: &str, want: Vec3) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let Some(player) = session.player.clone() else {
            return;
        };

        // dt is wall clock since the previous movement command, clamped so
        // a long-idle client cannot buy an arbitrarily long step.
        let min_dt = 1.0 / self.config.target_fps.max(1.0);
        let dt = session
            .last_move
            .map(|at| at.elapsed().as_secs_f32())
            .unwrap_or(min_dt)
            .clamp(min_dt, 2.0);
        session.last_move = Some(Instant::now());

        let outcome = self.apply_move(&player, want, dt);
        self.outbox.send(
            session_id,
            ServerMessage::MoveResult {
                success: outcome.ok,
                position: outcome.position,
                reason: outcome.blocked_reason,
            },
        );
        self.refresh_subscriptions(session_id);
    }

    fn handle_move_dir(&mut self, session_id: &str, directions: Vec<Direction>) {
        if directions.is_empty() || directions.len() > 2 {
            let err = WorldError::InvalidMessage(
                "move_dir takes one or two cardinal directions".to_owned(),
            );
            self.outbox.send(session_id, err.to_reply());
            return;
        }
        let Some(player) = self
            .sessions
            .get(session_id)
            .and_then(|s| s.player.clone())
        else {
            return;
        };

        let (step, allow_diagonal, normalized) =
            match self.store.get(&player, ContractKind::MovementRules) {
                Some(Contract::MovementRules {
                    step_distance,
                    allow_diagonal,
                    diagonal_normalized,
                }) => (*step_distance, *allow_diagonal, *diagonal_normalized),
                _ => (1.0, true, true),
            };

        let mut displacement = directions[0].unit();
        if directions.len() == 2 && allow_diagonal {
            displacement = displacement + directions[1].unit();
            if normalized {
                displacement = displacement.normalized();
            }
        }
        let displacement = displacement.scale(step);

        let current = self.store.position(&player).unwrap_or_else(Vec3::zero);
        self.handle_move(session_id, current + displacement);
    }

    fn handle_add_contract(&mut self, session_id: &str, entity_id: EntityId, contract: Contract) {
        if !self.session_owns(session_id, &entity_id) {
            let err = WorldError::PermissionDenied("may only mutate your own player".to_owned());
            self.outbox.send(session_id, err.to_reply());
            return;
        }
        if let Err(e) = self.add_contract_to(&entity_id, contract) {
            self.outbox.send(session_id, e.to_reply());
        }
    }

    fn handle_remove_contract(
        &mut self,
        session_id: &str,
        entity_id: EntityId,
        contract_type: String,
    ) {
        if !self.session_owns(session_id, &entity_id) {
            let err = WorldError::PermissionDenied("may only mutate your own player".to_owned());
            self.outbox.send(session_id, err.to_reply());
            return;
        }
        let Ok(kind) = contract_type.parse::<ContractKind>() else {
            self.outbox.send(
                session_id,
                ServerMessage::error(
                    "REMOVE_CONTRACT_FAILED",
                    format!("unknown contract type '{contract_type}'"),
                ),
            );
            return;
        };
        if !self.remove_contract_from(&entity_id, kind) {
            self.outbox.send(
                session_id,
                ServerMessage::error(
                    "CONTRACT_NOT_FOUND",
                    format!("entity has no '{contract_type}' contract"),
                ),
            );
        }
    }

    fn session_owns(&self, session_id: &str, entity_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .and_then(|s| s.player.as_deref())
            .is_some_and(|player| player == entity_id)
    }

    // -----------------------------------------------------------------------
    // View-based auto-subscription
    // -----------------------------------------------------------------------

    /// Recompute the session's desired chunk set from its player position
    /// and view radius, then apply the difference: unsubscribe from
    /// (current − desired), subscribe to (desired − current) with a
    /// snapshot each.
    pub fn refresh_subscriptions(&mut self, session_id: &str) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        let Some(player) = session.player.clone() else {
            return;
        };
        let Some(position) = self.store.position(&player) else {
            return;
        };
        let layer = session.layer.clone();
        let view_radius = session.view_radius;
        let current = session.subscriptions.clone();

        let chunk_size = self.layers.chunk_size_of(&layer);
        let chunk_radius = ((view_radius / chunk_size).ceil() as i32).max(0);
        let center = world_to_chunk(position, chunk_size);
        let desired: HashSet<ChunkKey> = neighbors(center, chunk_radius)
            .into_iter()
            .map(|(cx, cy, cz)| ChunkKey::new(&layer, cx, cy, cz))
            .collect();

        for key in current.difference(&desired) {
            self.chunks.unsubscribe(session_id, key);
        }
        for key in desired.difference(&current) {
            self.load_chunk(key);
            self.chunks.subscribe(session_id, key, &self.store);
        }

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.subscriptions = desired;
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance & stats
    // -----------------------------------------------------------------------

    /// Periodic housekeeping: time out dead sessions, then run chunk
    /// eviction and subscriber pruning.
    pub fn run_maintenance(&mut self) {
        let timeout = self.config.connection_timeout();
        for session_id in self.sessions.timed_out(timeout) {
            warn!("Session {session_id} timed out");
            self.disconnect(&session_id, "timeout");
        }

        let live = self.sessions.live_ids();
        let report = self.chunks.run_maintenance(&live);
        for key in &report.unloaded {
            self.events.publish(DevEvent::ChunkUnloaded { key: key.clone() });
        }
        if !report.unloaded.is_empty() || report.deleted > 0 || report.pruned_subscribers > 0 {
            debug!(
                "Chunk maintenance: {} unloaded, {} deleted, {} subscribers pruned",
                report.unloaded.len(),
                report.deleted,
                report.pruned_subscribers
            );
        }
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            entities: self.store.len(),
            players: self.sessions.player_count(),
            layers: self.layers.len(),
            loaded_chunks: self.chunks.loaded_count(),
            retained_chunks: self.chunks.retained_count(),
            sessions: self.sessions.len(),
            total_ticks: self.tick_count,
        }
    }
}
