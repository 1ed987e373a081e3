//! Chunk manager: per-chunk entity membership, static occupancy grids,
//! subscriber sets, version counters, procedural generation, and eviction.
//!
//! Every mutation of membership or of a member's contract set bumps the
//! chunk's version (strictly increasing, gapless, starting at 1); deltas
//! and snapshots carry the post-mutation version so clients can detect
//! drop/replay.
//!
//! Fan-out goes through the session [`Outbox`]. A subscriber whose channel
//! is full is dropped from the chunk rather than blocking the broadcaster;
//! the session resubscribes on its next activity.

use crate::config::WorldConfig;
use crate::layer::LayerRegistry;
use crate::protocol::{ChunkDelta, DeltaKind, EntityState, ServerMessage};
use crate::session::Outbox;
use crate::spatial::{chunk_center, CHUNK_HEIGHT};
use crate::store::EntityStore;
use crate::types::{Aabb, ChunkKey, EntityId, SessionId, Vec3};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Static occupancy grid
// ---------------------------------------------------------------------------

/// Dense bit volume of `resolution³` voxels marking coarse static
/// occupancy inside one chunk.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    resolution: usize,
    bits: Vec<u64>,
}

impl OccupancyGrid {
    pub fn new(resolution: usize) -> Self {
        let voxels = resolution * resolution * resolution;
        Self {
            resolution,
            bits: vec![0; voxels.div_ceil(64)],
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    fn bit_index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.resolution + y) * self.resolution + z
    }

    /// Out-of-range coordinates are clipped (set is a no-op).
    pub fn set_solid(&mut self, x: i32, y: i32, z: i32, solid: bool) {
        let r = self.resolution as i32;
        if x < 0 || y < 0 || z < 0 || x >= r || y >= r || z >= r {
            return;
        }
        let idx = self.bit_index(x as usize, y as usize, z as usize);
        if solid {
            self.bits[idx / 64] |= 1 << (idx % 64);
        } else {
            self.bits[idx / 64] &= !(1 << (idx % 64));
        }
    }

    /// Out-of-range coordinates read as empty.
    pub fn is_solid(&self, x: i32, y: i32, z: i32) -> bool {
        let r = self.resolution as i32;
        if x < 0 || y < 0 || z < 0 || x >= r || y >= r || z >= r {
            return false;
        }
        let idx = self.bit_index(x as usize, y as usize, z as usize);
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }

    pub fn any_solid(&self) -> bool {
        self.bits.iter().any(|w| *w != 0)
    }

    /// Map a world position to voxel indices within the chunk that owns it.
    /// The x/z axes wrap by chunk size, y by [`CHUNK_HEIGHT`].
    pub fn world_to_voxel(&self, pos: Vec3, chunk_size: f32) -> (i32, i32, i32) {
        let r = self.resolution as f32;
        let wrap = |v: f32, extent: f32| ((v % extent + extent) % extent / extent * r) as i32;
        (
            wrap(pos.x, chunk_size),
            wrap(pos.y, CHUNK_HEIGHT),
            wrap(pos.z, chunk_size),
        )
    }

    /// Does a world-space box overlap any solid voxel of the chunk at
    /// `origin`?
    pub fn overlaps_solid(&self, origin: Vec3, chunk_size: f32, bounds: &Aabb) -> bool {
        let r = self.resolution as f32;
        let vx = chunk_size / r;
        let vy = CHUNK_HEIGHT / r;

        // Voxels outside the grid read as empty, so clip the scan range.
        let last = self.resolution as i32 - 1;
        let lo = bounds.min - origin;
        let hi = bounds.max - origin;
        let x0 = ((lo.x / vx).floor() as i32).max(0);
        let x1 = ((hi.x / vx).floor() as i32).min(last);
        let y0 = ((lo.y / vy).floor() as i32).max(0);
        let y1 = ((hi.y / vy).floor() as i32).min(last);
        let z0 = ((lo.z / vx).floor() as i32).max(0);
        let z1 = ((hi.z / vx).floor() as i32).min(last);

        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    if self.is_solid(x, y, z) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

pub struct Chunk {
    pub key: ChunkKey,
    pub entities: HashSet<EntityId>,
    pub loaded: bool,
    pub occupancy: Option<OccupancyGrid>,
    pub subscribers: HashSet<SessionId>,
    pub version: u64,
    pub last_accessed: Instant,
    pub last_modified: Instant,
}

impl Chunk {
    fn new(key: ChunkKey) -> Self {
        let now = Instant::now();
        Self {
            key,
            entities: HashSet::new(),
            loaded: false,
            occupancy: None,
            subscribers: HashSet::new(),
            version: 1,
            last_accessed: now,
            last_modified: now,
        }
    }

    fn mark_modified(&mut self) {
        self.version += 1;
        self.last_modified = Instant::now();
    }
}

/// Summary of one maintenance pass.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub unloaded: Vec<ChunkKey>,
    pub deleted: usize,
    pub pruned_subscribers: usize,
}

// ---------------------------------------------------------------------------
// Chunk manager
// ---------------------------------------------------------------------------

pub struct ChunkManager {
    config: Arc<WorldConfig>,
    chunks: HashMap<ChunkKey, Chunk>,
    outbox: Outbox,
}

impl ChunkManager {
    pub fn new(config: Arc<WorldConfig>, outbox: Outbox) -> Self {
        Self {
            config,
            chunks: HashMap::new(),
            outbox,
        }
    }

    pub fn get(&self, key: &ChunkKey) -> Option<&Chunk> {
        self.chunks.get(key)
    }

    pub fn get_or_create(&mut self, key: &ChunkKey) -> &mut Chunk {
        let chunk = self
            .chunks
            .entry(key.clone())
            .or_insert_with(|| Chunk::new(key.clone()));
        chunk.last_accessed = Instant::now();
        chunk
    }

    pub fn version_of(&self, key: &ChunkKey) -> u64 {
        self.chunks.get(key).map_or(1, |c| c.version)
    }

    pub fn loaded_count(&self) -> usize {
        self.chunks.values().filter(|c| c.loaded).count()
    }

    pub fn retained_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn entities_in(&self, key: &ChunkKey) -> Vec<EntityId> {
        self.chunks
            .get(key)
            .map(|c| c.entities.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribers_of(&self, key: &ChunkKey) -> Vec<SessionId> {
        self.chunks
            .get(key)
            .map(|c| c.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Load / unload / generation
    // -----------------------------------------------------------------------

    /// Mark the chunk loaded, running procedural generation on first load.
    /// Returns whether the chunk was freshly loaded by this call.
    ///
    /// Generation is idempotent on the key: the generated entity id is
    /// derived from the key and re-loading never duplicates it.
    pub fn load(
        &mut self,
        key: &ChunkKey,
        store: &mut EntityStore,
        layers: &mut LayerRegistry,
    ) -> bool {
        let resolution = self.config.occupancy_resolution;
        let chunk = self.get_or_create(key);
        if chunk.loaded {
            return false;
        }
        chunk.loaded = true;
        if chunk.occupancy.is_none() {
            chunk.occupancy = Some(OccupancyGrid::new(resolution));
        }
        self.generate(key, store, layers);
        true
    }

    /// Mark unloaded; metadata (membership, occupancy, version) is retained.
    pub fn unload(&mut self, key: &ChunkKey) {
        if let Some(chunk) = self.chunks.get_mut(key) {
            chunk.loaded = false;
        }
    }

    /// Reference generation policy: on the ground plane (`cy == 0`), every
    /// fourth chunk along x and z gets one solid marker entity at its
    /// center, mirrored into the occupancy grid.
    fn generate(&mut self, key: &ChunkKey, store: &mut EntityStore, layers: &mut LayerRegistry) {
        use crate::contract::{Contract, Geometry};

        let (cx, cy, cz) = key.coords();
        if cy != 0 || cx.rem_euclid(4) != 0 || cz.rem_euclid(4) != 0 {
            return;
        }

        let chunk_size = layers.chunk_size_of(&key.layer_id);
        let center = chunk_center(cx, cy, cz, chunk_size);

        if let Some(chunk) = self.chunks.get_mut(key) {
            if let Some(grid) = chunk.occupancy.as_mut() {
                let (vx, vy, vz) = grid.world_to_voxel(center, chunk_size);
                grid.set_solid(vx, vy, vz, true);
            }
        }

        let id = format!("terrain-{}-{}-{}-{}", key.layer_id, cx, cy, cz);
        if store.contains(&id) {
            return;
        }

        let half = Vec3::new(0.5, 0.5, 0.5);
        let contracts = vec![
            Contract::Identity {
                id: id.clone(),
                name: Some("Terrain Block".to_owned()),
                description: None,
            },
            Contract::Mobility {
                position: center,
                velocity: None,
                max_speed: None,
                acceleration: None,
            },
            Contract::Shape {
                min: Vec3::zero() - half,
                max: half,
                geometry: Geometry::Box,
            },
            Contract::Visual {
                color: Some("#888888".to_owned()),
                texture: None,
                material: Some("stone".to_owned()),
                visible: Some(true),
            },
            Contract::Solidity {
                solid: true,
                collision_groups: None,
            },
        ];

        match store.create(&id, contracts) {
            Ok(()) => {
                layers.set_entity_layer(&id, &key.layer_id);
                self.add_entity(&id, key, store);
                debug!("Generated terrain entity {id} in {key}");
            }
            Err(e) => warn!("Chunk generation failed for {key}: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Add an entity to the chunk, bump the version, and fan out an
    /// `entity_add` delta.
    pub fn add_entity(&mut self, id: &str, key: &ChunkKey, store: &EntityStore) {
        let chunk = self.get_or_create(key);
        if !chunk.entities.insert(id.to_owned()) {
            return;
        }
        chunk.mark_modified();
        let contracts = store.contracts(id).map(<[_]>::to_vec);
        self.emit_delta(
            key,
            ChunkDelta {
                kind: DeltaKind::EntityAdd,
                entity_id: id.to_owned(),
                contracts,
            },
        );
    }

    /// Remove an entity from the chunk, bump the version, and fan out an
    /// `entity_remove` delta.
    pub fn remove_entity(&mut self, id: &str, key: &ChunkKey) {
        let Some(chunk) = self.chunks.get_mut(key) else {
            return;
        };
        if !chunk.entities.remove(id) {
            return;
        }
        chunk.mark_modified();
        self.emit_delta(
            key,
            ChunkDelta {
                kind: DeltaKind::EntityRemove,
                entity_id: id.to_owned(),
                contracts: None,
            },
        );
    }

    /// Membership transfer between two chunks: remove then add.
    pub fn move_entity(&mut self, id: &str, from: &ChunkKey, to: &ChunkKey, store: &EntityStore) {
        self.remove_entity(id, from);
        self.add_entity(id, to, store);
    }

    /// A member's contract set changed in place: bump the version and fan
    /// out an `entity_update` delta.
    pub fn entity_updated(&mut self, key: &ChunkKey, id: &str, store: &EntityStore) {
        let Some(chunk) = self.chunks.get_mut(key) else {
            return;
        };
        if !chunk.entities.contains(id) {
            return;
        }
        chunk.mark_modified();
        let contracts = store.contracts(id).map(<[_]>::to_vec);
        self.emit_delta(
            key,
            ChunkDelta {
                kind: DeltaKind::EntityUpdate,
                entity_id: id.to_owned(),
                contracts,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Subscription & fan-out
    // -----------------------------------------------------------------------

    /// Add the session to the chunk's subscriber set and send it a full
    /// snapshot.
    pub fn subscribe(&mut self, session: &str, key: &ChunkKey, store: &EntityStore) {
        let chunk = self.get_or_create(key);
        chunk.subscribers.insert(session.to_owned());
        self.emit_snapshot(key, session, store);
    }

    pub fn unsubscribe(&mut self, session: &str, key: &ChunkKey) {
        if let Some(chunk) = self.chunks.get_mut(key) {
            chunk.subscribers.remove(session);
        }
    }

    pub fn unsubscribe_all(&mut self, session: &str) {
        for chunk in self.chunks.values_mut() {
            chunk.subscribers.remove(session);
        }
    }

    /// Full-state snapshot of the chunk for one session.
    pub fn emit_snapshot(&mut self, key: &ChunkKey, session: &str, store: &EntityStore) {
        let Some(chunk) = self.chunks.get(key) else {
            return;
        };
        let entities = chunk
            .entities
            .iter()
            .filter_map(|id| {
                store.contracts(id).map(|c| EntityState {
                    id: id.clone(),
                    contracts: c.to_vec(),
                })
            })
            .collect();
        let msg = ServerMessage::ChunkSnapshot {
            chunk_key: key.clone(),
            entities,
            version: chunk.version,
        };
        if !self.outbox.send(session, msg) {
            self.drop_subscriber(key, session);
        }
    }

    /// Versioned delta to every subscriber of the chunk.
    pub fn emit_delta(&mut self, key: &ChunkKey, delta: ChunkDelta) {
        let Some(chunk) = self.chunks.get(key) else {
            return;
        };
        let msg = ServerMessage::ChunkDelta {
            chunk_key: key.clone(),
            delta,
            version: chunk.version,
        };
        self.broadcast(key, msg);
    }

    /// Send a message to every subscriber; stale subscribers (closed or
    /// back-pressured channels) are dropped from the set.
    pub fn broadcast(&mut self, key: &ChunkKey, msg: ServerMessage) {
        let Some(chunk) = self.chunks.get(key) else {
            return;
        };
        let subscribers: Vec<SessionId> = chunk.subscribers.iter().cloned().collect();
        let mut stale = Vec::new();
        for session in subscribers {
            if !self.outbox.send(&session, msg.clone()) {
                stale.push(session);
            }
        }
        for session in stale {
            warn!("Dropping stale subscriber {session} from {key}");
            self.drop_subscriber(key, &session);
        }
    }

    fn drop_subscriber(&mut self, key: &ChunkKey, session: &str) {
        if let Some(chunk) = self.chunks.get_mut(key) {
            chunk.subscribers.remove(session);
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Periodic pass: prune dead subscribers, unload the stalest loaded
    /// chunks over the loaded cap, and delete metadata of long-idle empty
    /// chunks over the retention cap.
    pub fn run_maintenance(&mut self, live_sessions: &HashSet<SessionId>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        for chunk in self.chunks.values_mut() {
            let before = chunk.subscribers.len();
            chunk.subscribers.retain(|s| live_sessions.contains(s));
            report.pruned_subscribers += before - chunk.subscribers.len();
        }

        let loaded = self.loaded_count();
        if loaded > self.config.max_loaded_chunks {
            let batch = loaded - self.config.max_loaded_chunks + 100;
            let mut candidates: Vec<(Instant, ChunkKey)> = self
                .chunks
                .values()
                .filter(|c| c.loaded)
                .map(|c| (c.last_accessed, c.key.clone()))
                .collect();
            candidates.sort_by_key(|(at, _)| *at);
            for (_, key) in candidates.into_iter().take(batch) {
                self.unload(&key);
                report.unloaded.push(key);
            }
        }

        if self.chunks.len() > self.config.max_retained_chunks {
            let idle_for = self.config.chunk_unload_delay() * 2;
            let before = self.chunks.len();
            self.chunks.retain(|_, c| {
                c.loaded
                    || !c.entities.is_empty()
                    || !c.subscribers.is_empty()
                    || c.last_accessed.elapsed() < idle_for
            });
            report.deleted = before - self.chunks.len();
        }

        report
    }
}
