//! Authoritative movement: the per-tick gravity/friction integrator and the
//! `attempt_move` intent pipeline, both backed by one swept-AABB test
//! against static chunk occupancy and dynamic solid entities.
//!
//! ## Swept test
//!
//! Dynamic obstacles use the Minkowski-expanded-target slab method: the
//! target box grows by the mover's half-extents and the mover's center
//! sweeps through it as a segment. Static occupancy grids use the coarse
//! overlap-at-end policy (the grid marks approximate occupancy only). The
//! reported collision is the nearest across all candidates; a tie between
//! a grid hit and an entity hit resolves to the entity.

use crate::config::WorldConfig;
use crate::chunk::ChunkManager;
use crate::contract::{Contract, ContractKind};
use crate::layer::LayerRegistry;
use crate::spatial::{neighbors, world_to_chunk};
use crate::store::EntityStore;
use crate::types::{Aabb, ChunkKey, EntityId, Vec3};
use std::collections::HashSet;
use std::sync::Arc;

/// Applied when an entity's `mobility` carries no `maxSpeed`.
pub const DEFAULT_MAX_SPEED: f32 = 5.0;

/// Distance below the feet probed for ground contact.
const GROUND_PROBE: f32 = 0.1;

/// Outcome of an authoritative movement intent.
///
/// A blocked move is a normal outcome, not an error: `position` is the
/// clamped stopping point and `blocked_reason`/`collision_normal` describe
/// the blocker.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub ok: bool,
    pub position: Vec3,
    pub blocked_reason: Option<String>,
    pub collision_normal: Option<Vec3>,
}

impl MoveOutcome {
    fn accepted(position: Vec3) -> Self {
        Self {
            ok: true,
            position,
            blocked_reason: None,
            collision_normal: None,
        }
    }

    fn blocked(position: Vec3, reason: impl Into<String>, normal: Option<Vec3>) -> Self {
        Self {
            ok: false,
            position,
            blocked_reason: Some(reason.into()),
            collision_normal: normal,
        }
    }
}

/// Nearest collision found by the swept test. `entity` is `None` for a
/// static-grid hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepHit {
    pub distance: f32,
    pub normal: Vec3,
    pub entity: Option<EntityId>,
}

pub struct MovementSystem {
    config: Arc<WorldConfig>,
}

impl MovementSystem {
    pub fn new(config: Arc<WorldConfig>) -> Self {
        Self { config }
    }

    // -----------------------------------------------------------------------
    // Authoritative intent
    // -----------------------------------------------------------------------

    /// Validate, clamp to `maxSpeed · dt`, sweep, and return the furthest
    /// safe position. Does not write back; the caller owns the single
    /// mutation surface.
    pub fn attempt_move(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layers: &LayerRegistry,
        id: &str,
        want: Vec3,
        dt: f32,
    ) -> MoveOutcome {
        let Some(mobility) = store.get(id, ContractKind::Mobility).cloned() else {
            return MoveOutcome::blocked(
                store.position(id).unwrap_or_else(Vec3::zero),
                "no mobility",
                None,
            );
        };
        let Contract::Mobility {
            position: current,
            max_speed,
            ..
        } = mobility
        else {
            unreachable!("get() returns the queried kind");
        };
        let Some(local_shape) = store.local_shape(id) else {
            return MoveOutcome::blocked(current, "no shape", None);
        };

        let eps = self.config.collision_epsilon;
        let direction = want - current;
        let distance = direction.length();
        if distance < eps {
            return MoveOutcome::accepted(current);
        }

        let max_speed = max_speed.unwrap_or(DEFAULT_MAX_SPEED);
        let travel = distance.min(max_speed * dt.max(0.0));
        let unit = direction.normalized();
        let displacement = unit.scale(travel);
        let proposed = current + displacement;

        let layer = layers.entity_layer(id).to_owned();
        let start_box = local_shape.translated(current);
        match self.sweep(store, chunks, layers, id, &layer, &start_box, displacement) {
            None => MoveOutcome::accepted(proposed),
            Some(hit) => {
                let t = (hit.distance / travel - eps).max(0.0);
                let position = current + unit.scale(travel * t);
                let reason = match &hit.entity {
                    Some(other) => format!("blocked by entity {other}"),
                    None => "blocked by static geometry".to_owned(),
                };
                MoveOutcome::blocked(position, reason, Some(hit.normal))
            }
        }
    }

    /// Set the position directly, refusing destinations that collide.
    /// Returns the mobility record to write back on success (velocity
    /// zeroed).
    pub fn teleport(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layers: &LayerRegistry,
        id: &str,
        destination: Vec3,
    ) -> Result<Contract, MoveOutcome> {
        let Some(Contract::Mobility {
            position,
            max_speed,
            acceleration,
            ..
        }) = store.get(id, ContractKind::Mobility).cloned()
        else {
            return Err(MoveOutcome::blocked(Vec3::zero(), "no mobility", None));
        };

        if let Some(local_shape) = store.local_shape(id) {
            let layer = layers.entity_layer(id).to_owned();
            let target = local_shape.translated(destination);
            if self.position_collides(store, chunks, layers, id, &layer, &target) {
                return Err(MoveOutcome::blocked(position, "destination blocked", None));
            }
        }

        Ok(Contract::Mobility {
            position: destination,
            velocity: Some(Vec3::zero()),
            max_speed,
            acceleration,
        })
    }

    /// Mobility record with velocity replaced.
    pub fn with_velocity(&self, store: &EntityStore, id: &str, velocity: Vec3) -> Option<Contract> {
        let Contract::Mobility {
            position,
            max_speed,
            acceleration,
            ..
        } = store.get(id, ContractKind::Mobility)?.clone()
        else {
            return None;
        };
        Some(Contract::Mobility {
            position,
            velocity: Some(velocity),
            max_speed,
            acceleration,
        })
    }

    /// Mobility record with an impulse added onto the current velocity.
    pub fn with_impulse(&self, store: &EntityStore, id: &str, impulse: Vec3) -> Option<Contract> {
        let Contract::Mobility {
            position,
            velocity,
            max_speed,
            acceleration,
        } = store.get(id, ContractKind::Mobility)?.clone()
        else {
            return None;
        };
        let velocity = velocity.unwrap_or_else(Vec3::zero) + impulse;
        Some(Contract::Mobility {
            position,
            velocity: Some(velocity),
            max_speed,
            acceleration,
        })
    }

    // -----------------------------------------------------------------------
    // Tick integrator
    // -----------------------------------------------------------------------

    /// Advance gravity, friction, and velocity for every mobile entity.
    ///
    /// Pure with respect to the store: returns the mobility records to
    /// write back so the caller can route them through the mutation
    /// surface (chunk re-membership, broadcasts). Entities without a shape
    /// integrate velocity only; there is no box to collide or probe with.
    pub fn integrate(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layers: &LayerRegistry,
        dt: f32,
    ) -> Vec<(EntityId, Contract)> {
        let eps = self.config.collision_epsilon;
        let mut updates = Vec::new();

        for id in store.list_with(ContractKind::Mobility) {
            let Some(Contract::Mobility {
                position,
                velocity,
                max_speed,
                acceleration,
            }) = store.get(&id, ContractKind::Mobility).cloned()
            else {
                continue;
            };
            let mut v = velocity.unwrap_or_else(Vec3::zero);

            let Some(local_shape) = store.local_shape(&id) else {
                if v.length() > eps {
                    let moved = position + v.scale(dt);
                    updates.push((
                        id,
                        Contract::Mobility {
                            position: moved,
                            velocity: Some(v),
                            max_speed,
                            acceleration,
                        },
                    ));
                }
                continue;
            };

            let layer = layers.entity_layer(&id).to_owned();
            let world_box = local_shape.translated(position);
            let probe = world_box.translated(Vec3::new(0.0, -GROUND_PROBE, 0.0));
            let grounded = self.position_collides(store, chunks, layers, &id, &layer, &probe);

            if !grounded {
                v.y += layers.gravity_of(&layer) * dt;
                if v.y < self.config.terminal_velocity {
                    v.y = self.config.terminal_velocity;
                }
            } else if v.y < 0.0 {
                v.y = 0.0;
            }

            let friction = if grounded {
                self.config.ground_friction
            } else {
                self.config.air_friction
            };
            let factor = friction.powf(dt);
            v.x *= factor;
            v.z *= factor;

            if let Some(ms) = max_speed {
                let horizontal = (v.x * v.x + v.z * v.z).sqrt();
                if horizontal > ms {
                    let scale = ms / horizontal;
                    v.x *= scale;
                    v.z *= scale;
                }
            }

            if v.length() <= eps && velocity.map_or(true, |v0| v0.length() <= eps) {
                continue;
            }

            let candidate = position + v.scale(dt);
            let collides = |target: Vec3| {
                let moved = local_shape.translated(target);
                self.position_collides(store, chunks, layers, &id, &layer, &moved)
            };

            let mut next = position;
            if !collides(candidate) {
                next = candidate;
            } else {
                let horizontal = Vec3::new(candidate.x, position.y, candidate.z);
                let vertical = Vec3::new(position.x, candidate.y, position.z);
                if !collides(horizontal) {
                    next = horizontal;
                    v.y = 0.0;
                } else if !collides(vertical) {
                    next = vertical;
                    v.x = 0.0;
                    v.z = 0.0;
                } else {
                    v = Vec3::zero();
                }
            }

            updates.push((
                id,
                Contract::Mobility {
                    position: next,
                    velocity: Some(v),
                    max_speed,
                    acceleration,
                },
            ));
        }

        updates
    }

    // -----------------------------------------------------------------------
    // Collision queries
    // -----------------------------------------------------------------------

    /// Does a world-space box collide with static occupancy or any dynamic
    /// solid (excluding `self_id`)?
    pub fn position_collides(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layers: &LayerRegistry,
        self_id: &str,
        layer: &str,
        bounds: &Aabb,
    ) -> bool {
        let chunk_size = layers.chunk_size_of(layer);

        for cell in neighbors(world_to_chunk(bounds.center(), chunk_size), 1) {
            let key = ChunkKey::new(layer, cell.0, cell.1, cell.2);
            let Some(chunk) = chunks.get(&key) else {
                continue;
            };
            if let Some(grid) = &chunk.occupancy {
                let origin = crate::spatial::chunk_to_world(cell.0, cell.1, cell.2, chunk_size);
                if grid.overlaps_solid(origin, chunk_size, bounds) {
                    return true;
                }
            }
        }

        for other in self.solid_obstacles(store, layers, self_id, layer) {
            let Some(target) = store.world_shape(&other) else {
                continue;
            };
            if bounds.intersects(&target) {
                return true;
            }
        }

        false
    }

    /// Swept test of the mover box against every candidate obstacle;
    /// returns the nearest hit.
    fn sweep(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layers: &LayerRegistry,
        self_id: &str,
        layer: &str,
        start_box: &Aabb,
        displacement: Vec3,
    ) -> Option<SweepHit> {
        let mut static_hit: Option<SweepHit> = None;
        let mut dynamic_hit: Option<SweepHit> = None;
        let total = displacement.length();

        // Static occupancy: end-position overlap against the grids of the
        // start/end chunks and their immediate neighborhoods.
        let chunk_size = layers.chunk_size_of(layer);
        let end_box = start_box.translated(displacement);
        let mut candidates: HashSet<(i32, i32, i32)> = HashSet::new();
        candidates.extend(neighbors(world_to_chunk(start_box.center(), chunk_size), 1));
        candidates.extend(neighbors(world_to_chunk(end_box.center(), chunk_size), 1));

        for cell in candidates {
            let key = ChunkKey::new(layer, cell.0, cell.1, cell.2);
            let Some(chunk) = chunks.get(&key) else {
                continue;
            };
            let Some(grid) = &chunk.occupancy else {
                continue;
            };
            let origin = crate::spatial::chunk_to_world(cell.0, cell.1, cell.2, chunk_size);
            if grid.overlaps_solid(origin, chunk_size, &end_box) {
                static_hit = Some(SweepHit {
                    distance: total * 0.5,
                    normal: Vec3::new(0.0, 1.0, 0.0),
                    entity: None,
                });
                break;
            }
        }

        // Dynamic solids: Minkowski-expanded slab test, center vs box.
        let half = start_box.half_extents();
        let center = start_box.center();
        for other in self.solid_obstacles(store, layers, self_id, layer) {
            let Some(target) = store.world_shape(&other) else {
                continue;
            };
            let expanded = target.expanded(half);
            let Some((t, normal)) = segment_vs_aabb(center, displacement, &expanded) else {
                continue;
            };
            let distance = t * total;
            if dynamic_hit.as_ref().is_none_or(|h| distance < h.distance) {
                dynamic_hit = Some(SweepHit {
                    distance,
                    normal,
                    entity: Some(other),
                });
            }
        }

        // Nearest wins; the static grid loses ties to dynamic entities.
        match (static_hit, dynamic_hit) {
            (None, hit) | (hit, None) => hit,
            (Some(s), Some(d)) => {
                if s.distance + self.config.collision_epsilon < d.distance {
                    Some(s)
                } else {
                    Some(d)
                }
            }
        }
    }

    /// Ids of solid, shaped, positioned entities in `layer`, excluding the
    /// mover itself.
    fn solid_obstacles(
        &self,
        store: &EntityStore,
        layers: &LayerRegistry,
        self_id: &str,
        layer: &str,
    ) -> Vec<EntityId> {
        store
            .list_with_all(&[
                ContractKind::Solidity,
                ContractKind::Shape,
                ContractKind::Mobility,
            ])
            .into_iter()
            .filter(|id| id != self_id)
            .filter(|id| store.is_solid(id))
            .filter(|id| layers.entity_layer(id) == layer)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Slab intersection
// ---------------------------------------------------------------------------

/// Intersect the segment `p0 → p0 + d` against a box. Returns the entry
/// fraction `t ∈ [0, 1]` and the axis-aligned entry normal (opposite to
/// the displacement on the entry axis). Segments starting inside the box
/// report no hit.
fn segment_vs_aabb(p0: Vec3, d: Vec3, bounds: &Aabb) -> Option<(f32, Vec3)> {
    const PARALLEL_EPS: f32 = 1e-8;

    let mut tmin = f32::NEG_INFINITY;
    let mut tmax = f32::INFINITY;
    let mut normal = Vec3::zero();

    let axes = [
        (p0.x, d.x, bounds.min.x, bounds.max.x, Vec3::new(1.0, 0.0, 0.0)),
        (p0.y, d.y, bounds.min.y, bounds.max.y, Vec3::new(0.0, 1.0, 0.0)),
        (p0.z, d.z, bounds.min.z, bounds.max.z, Vec3::new(0.0, 0.0, 1.0)),
    ];

    for (p, dir, min, max, axis) in axes {
        if dir.abs() < PARALLEL_EPS {
            if p < min || p > max {
                return None;
            }
            continue;
        }
        let inv = 1.0 / dir;
        let (t1, t2) = {
            let a = (min - p) * inv;
            let b = (max - p) * inv;
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        };
        if t1 > tmin {
            tmin = t1;
            normal = axis.scale(if dir > 0.0 { -1.0 } else { 1.0 });
        }
        tmax = tmax.min(t2);
        if tmin > tmax {
            return None;
        }
    }

    if (0.0..=1.0).contains(&tmin) {
        Some((tmin, normal))
    } else {
        None
    }
}
