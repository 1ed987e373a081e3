//! Durability: damage, healing, and auto-destruction with bounded event
//! logs.
//!
//! Every entity that gains an `identity` is guaranteed a `durability`
//! contract on the next tick (default 1/1 health). Armor absorbs
//! `min(75%, 1% per point)` of incoming damage. Health reaching zero
//! destroys the entity; the caller (the world core) performs the actual
//! removal so chunk membership and fan-out stay consistent; this module
//! owns the math and the logs.

use crate::contract::{Contract, ContractKind};
use crate::error::{Result, WorldError};
use crate::store::EntityStore;
use crate::types::EntityId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Events retained per log, newest last.
const EVENT_LOG_CAP: usize = 100;

const ARMOR_ABSORB_CAP: f32 = 0.75;
const ARMOR_ABSORB_PER_POINT: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct DamageEvent {
    pub entity: EntityId,
    pub amount: f32,
    /// Post-armor damage actually applied.
    pub actual: f32,
    pub remaining_health: f32,
    pub source: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealEvent {
    pub entity: EntityId,
    pub amount: f32,
    pub health: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestroyEvent {
    pub entity: EntityId,
    pub cause: String,
}

pub struct DurabilitySystem {
    /// Entities that gained `identity` and await a durability guarantee;
    /// filled by a store hook, drained on the next tick.
    pending_identity: Arc<Mutex<Vec<EntityId>>>,
    damage_log: VecDeque<DamageEvent>,
    heal_log: VecDeque<HealEvent>,
    destroy_log: VecDeque<DestroyEvent>,
}

impl DurabilitySystem {
    pub fn new() -> Self {
        Self {
            pending_identity: Arc::new(Mutex::new(Vec::new())),
            damage_log: VecDeque::new(),
            heal_log: VecDeque::new(),
            destroy_log: VecDeque::new(),
        }
    }

    /// Register the identity-add hook that schedules the durability
    /// guarantee. The hook only queues; store mutation happens on the
    /// next [`DurabilitySystem::tick`], never reentrantly.
    pub fn install_hooks(&self, store: &mut EntityStore) {
        let pending = Arc::clone(&self.pending_identity);
        store.on_contract_added(
            ContractKind::Identity,
            Box::new(move |id, _| pending.lock().push(id.to_owned())),
        );
    }

    // -----------------------------------------------------------------------
    // Damage / heal / repair
    // -----------------------------------------------------------------------

    /// Apply damage. Returns `Ok(false)` when armor absorbs everything.
    /// The caller must destroy the entity if its health reached zero.
    pub fn damage(
        &mut self,
        store: &mut EntityStore,
        id: &str,
        amount: f32,
        source: Option<&str>,
    ) -> Result<bool> {
        let (health, max_health, armor) = self.read_or_default(store, id)?;

        let absorb = (armor * ARMOR_ABSORB_PER_POINT).min(ARMOR_ABSORB_CAP);
        let actual = amount * (1.0 - absorb);
        if actual <= 0.0 {
            return Ok(false);
        }

        let remaining = (health - actual).max(0.0);
        store.add(
            id,
            Contract::Durability {
                health: remaining,
                max_health,
                armor: if armor > 0.0 { Some(armor) } else { None },
            },
        )?;

        self.push_damage(DamageEvent {
            entity: id.to_owned(),
            amount,
            actual,
            remaining_health: remaining,
            source: source.map(str::to_owned),
        });
        Ok(true)
    }

    /// Heal by a strictly positive amount, capped at `maxHealth`.
    /// Returns `Ok(false)` when nothing changed.
    pub fn heal(&mut self, store: &mut EntityStore, id: &str, amount: f32) -> Result<bool> {
        if amount <= 0.0 {
            return Ok(false);
        }
        let (health, max_health, armor) = self.read_or_default(store, id)?;
        let healed = (health + amount).min(max_health);
        if healed <= health {
            return Ok(false);
        }

        store.add(
            id,
            Contract::Durability {
                health: healed,
                max_health,
                armor: if armor > 0.0 { Some(armor) } else { None },
            },
        )?;

        self.push_heal(HealEvent {
            entity: id.to_owned(),
            amount: healed - health,
            health: healed,
        });
        Ok(true)
    }

    /// Heal back to full.
    pub fn repair(&mut self, store: &mut EntityStore, id: &str) -> Result<bool> {
        let (health, max_health, _) = self.read_or_default(store, id)?;
        self.heal(store, id, max_health - health)
    }

    fn read_or_default(&self, store: &EntityStore, id: &str) -> Result<(f32, f32, f32)> {
        if !store.contains(id) {
            return Err(WorldError::UnknownEntity(id.to_owned()));
        }
        match store.get(id, ContractKind::Durability) {
            Some(Contract::Durability {
                health,
                max_health,
                armor,
            }) => Ok((*health, *max_health, armor.unwrap_or(0.0))),
            _ => Ok((1.0, 1.0, 0.0)),
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Guarantee durability for entities that gained `identity`, then sweep
    /// for dead entities (health ≤ 0, however it got there). Returns the
    /// ids the caller must destroy.
    pub fn tick(&mut self, store: &mut EntityStore) -> Vec<EntityId> {
        let pending: Vec<EntityId> = std::mem::take(&mut *self.pending_identity.lock());
        for id in pending {
            if store.contains(&id) && store.get(&id, ContractKind::Durability).is_none() {
                let _ = store.add(
                    &id,
                    Contract::Durability {
                        health: 1.0,
                        max_health: 1.0,
                        armor: None,
                    },
                );
            }
        }

        store
            .list_with(ContractKind::Durability)
            .into_iter()
            .filter(|id| {
                matches!(
                    store.get(id, ContractKind::Durability),
                    Some(Contract::Durability { health, .. }) if *health <= 0.0
                )
            })
            .collect()
    }

    /// Record a destruction; the world core calls this right before the
    /// entity is removed, so log observers can still see it in the store.
    pub fn record_destroy(&mut self, id: &str, cause: impl Into<String>) {
        self.push_destroy(DestroyEvent {
            entity: id.to_owned(),
            cause: cause.into(),
        });
    }

    // -----------------------------------------------------------------------
    // Event log queries
    // -----------------------------------------------------------------------

    pub fn damage_events(&self, entity: Option<&str>) -> Vec<&DamageEvent> {
        self.damage_log
            .iter()
            .filter(|e| entity.is_none_or(|id| e.entity == id))
            .collect()
    }

    pub fn heal_events(&self, entity: Option<&str>) -> Vec<&HealEvent> {
        self.heal_log
            .iter()
            .filter(|e| entity.is_none_or(|id| e.entity == id))
            .collect()
    }

    pub fn destroy_events(&self, entity: Option<&str>) -> Vec<&DestroyEvent> {
        self.destroy_log
            .iter()
            .filter(|e| entity.is_none_or(|id| e.entity == id))
            .collect()
    }

    fn push_damage(&mut self, event: DamageEvent) {
        if self.damage_log.len() == EVENT_LOG_CAP {
            self.damage_log.pop_front();
        }
        self.damage_log.push_back(event);
    }

    fn push_heal(&mut self, event: HealEvent) {
        if self.heal_log.len() == EVENT_LOG_CAP {
            self.heal_log.pop_front();
        }
        self.heal_log.push_back(event);
    }

    fn push_destroy(&mut self, event: DestroyEvent) {
        if self.destroy_log.len() == EVENT_LOG_CAP {
            self.destroy_log.pop_front();
        }
        self.destroy_log.push_back(event);
    }
}

impl Default for DurabilitySystem {
    fn default() -> Self {
        Self::new()
    }
}
