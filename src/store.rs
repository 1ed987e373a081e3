//! Entity store: the map entity → contracts plus the inverted
//! kind → entities index, with lifecycle hooks.
//!
//! ## Invariants
//!
//! - An entity appears in the inverted index for a kind iff it currently
//!   owns at least one contract of that kind. Both structures are updated
//!   by a single mutating primitive ([`EntityStore::add`] /
//!   [`EntityStore::remove_contract`]) so they cannot diverge.
//! - A contract passes schema validation before any reader can observe it.
//! - Contracts are stored in insertion order; "oldest" for cardinality
//!   eviction means first-inserted of the kind, and [`EntityStore::get`]
//!   returns the newest.
//!
//! Hooks run synchronously in registration order. They receive ids and
//! borrowed contracts only; a hook that needs to mutate world state queues
//! the work (e.g. onto a channel) to run after the current operation, never
//! reentrantly.

use crate::contract::{Contract, ContractKind, SchemaRegistry};
use crate::error::{Result, WorldError};
use crate::types::{Aabb, EntityId, Vec3};
use std::collections::{HashMap, HashSet};

pub type EntityHook = Box<dyn Fn(&str) + Send + Sync>;
pub type ContractHook = Box<dyn Fn(&str, &Contract) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    entity_added: Vec<EntityHook>,
    entity_removed: Vec<EntityHook>,
    contract_added: HashMap<ContractKind, Vec<ContractHook>>,
    contract_removed: HashMap<ContractKind, Vec<ContractHook>>,
}

pub struct EntityStore {
    entities: HashMap<EntityId, Vec<Contract>>,
    index: HashMap<ContractKind, HashSet<EntityId>>,
    schemas: SchemaRegistry,
    hooks: Hooks,
}

impl EntityStore {
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self {
            entities: HashMap::new(),
            index: HashMap::new(),
            schemas,
            hooks: Hooks::default(),
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn schemas_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.schemas
    }

    // -----------------------------------------------------------------------
    // Hook registration
    // -----------------------------------------------------------------------

    pub fn on_entity_added(&mut self, hook: EntityHook) {
        self.hooks.entity_added.push(hook);
    }

    pub fn on_entity_removed(&mut self, hook: EntityHook) {
        self.hooks.entity_removed.push(hook);
    }

    pub fn on_contract_added(&mut self, kind: ContractKind, hook: ContractHook) {
        self.hooks.contract_added.entry(kind).or_default().push(hook);
    }

    pub fn on_contract_removed(&mut self, kind: ContractKind, hook: ContractHook) {
        self.hooks
            .contract_removed
            .entry(kind)
            .or_default()
            .push(hook);
    }

    fn fire_contract_added(&self, id: &str, contract: &Contract) {
        if let Some(hooks) = self.hooks.contract_added.get(&contract.kind()) {
            for hook in hooks {
                hook(id, contract);
            }
        }
    }

    fn fire_contract_removed(&self, id: &str, contract: &Contract) {
        if let Some(hooks) = self.hooks.contract_removed.get(&contract.kind()) {
            for hook in hooks {
                hook(id, contract);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Entity lifecycle
    // -----------------------------------------------------------------------

    /// Create an entity with an initial contract set.
    ///
    /// Every contract is validated before anything becomes observable. The
    /// entity-added hook fires first, then contracts are inserted one at a
    /// time under normal cardinality resolution (each firing its add hook).
    pub fn create(&mut self, id: impl Into<EntityId>, contracts: Vec<Contract>) -> Result<()> {
        let id = id.into();
        if self.entities.contains_key(&id) {
            return Err(WorldError::AlreadyExists(id));
        }
        for contract in &contracts {
            self.schemas.validate(contract)?;
        }

        self.entities.insert(id.clone(), Vec::new());
        for hook in &self.hooks.entity_added {
            hook(&id);
        }
        for contract in contracts {
            self.add(&id, contract)?;
        }
        Ok(())
    }

    /// Remove an entity and everything it owns.
    ///
    /// Contract-remove hooks fire while the entity is still present (with a
    /// shrinking contract set); the entity-removed hook fires after it is
    /// gone from the store.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.entities.contains_key(id) {
            return false;
        }

        loop {
            let Some(contract) = self.entities.get_mut(id).and_then(|c| {
                if c.is_empty() {
                    None
                } else {
                    Some(c.remove(0))
                }
            }) else {
                break;
            };
            self.unindex_if_last(id, contract.kind());
            self.fire_contract_removed(id, &contract);
        }

        self.entities.remove(id);
        for hook in &self.hooks.entity_removed {
            hook(id);
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    // -----------------------------------------------------------------------
    // Contract mutation
    // -----------------------------------------------------------------------

    /// Add a contract under cardinality resolution: while the entity is at
    /// its ceiling for the kind, the oldest record of that kind is evicted
    /// (firing its remove hook) before the new one is inserted.
    pub fn add(&mut self, id: &str, contract: Contract) -> Result<()> {
        if !self.entities.contains_key(id) {
            return Err(WorldError::UnknownEntity(id.to_owned()));
        }
        self.schemas.validate(&contract)?;

        let kind = contract.kind();
        let limit_override = self.get(id, ContractKind::ContractLimit).cloned();
        let max = SchemaRegistry::max_for(limit_override.as_ref(), kind);

        if let Some(max) = max {
            if max == 0 {
                return Err(WorldError::LimitExceeded {
                    entity: id.to_owned(),
                    kind,
                });
            }
            loop {
                let count = self.count_of(id, kind);
                if count < max as usize {
                    break;
                }
                let evicted = self.take_oldest(id, kind);
                match evicted {
                    Some(old) => self.fire_contract_removed(id, &old),
                    None => {
                        // Count said we were at the ceiling but nothing was
                        // removable; refuse rather than overshoot.
                        return Err(WorldError::LimitExceeded {
                            entity: id.to_owned(),
                            kind,
                        });
                    }
                }
            }
        }

        let Some(record) = self.entities.get_mut(id) else {
            return Err(WorldError::UnknownEntity(id.to_owned()));
        };
        record.push(contract.clone());
        self.index.entry(kind).or_default().insert(id.to_owned());
        self.fire_contract_added(id, &contract);
        Ok(())
    }

    /// Remove every contract of `kind` from the entity. Returns whether
    /// anything was removed.
    pub fn remove_contract(&mut self, id: &str, kind: ContractKind) -> bool {
        let mut removed = Vec::new();
        if let Some(record) = self.entities.get_mut(id) {
            let mut i = 0;
            while i < record.len() {
                if record[i].kind() == kind {
                    removed.push(record.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        if removed.is_empty() {
            return false;
        }
        self.unindex_if_last(id, kind);
        for contract in &removed {
            self.fire_contract_removed(id, contract);
        }
        true
    }

    fn take_oldest(&mut self, id: &str, kind: ContractKind) -> Option<Contract> {
        let record = self.entities.get_mut(id)?;
        let pos = record.iter().position(|c| c.kind() == kind)?;
        let contract = record.remove(pos);
        self.unindex_if_last(id, kind);
        Some(contract)
    }

    fn unindex_if_last(&mut self, id: &str, kind: ContractKind) {
        let still_has = self
            .entities
            .get(id)
            .is_some_and(|r| r.iter().any(|c| c.kind() == kind));
        if !still_has {
            if let Some(set) = self.index.get_mut(&kind) {
                set.remove(id);
            }
        }
    }

    fn count_of(&self, id: &str, kind: ContractKind) -> usize {
        self.entities
            .get(id)
            .map_or(0, |r| r.iter().filter(|c| c.kind() == kind).count())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Newest contract of `kind` on the entity, if any.
    pub fn get(&self, id: &str, kind: ContractKind) -> Option<&Contract> {
        self.entities
            .get(id)?
            .iter()
            .rev()
            .find(|c| c.kind() == kind)
    }

    /// Every contract of `kind` on the entity, oldest first.
    pub fn get_all(&self, id: &str, kind: ContractKind) -> Vec<&Contract> {
        self.entities
            .get(id)
            .map(|r| r.iter().filter(|c| c.kind() == kind).collect())
            .unwrap_or_default()
    }

    /// The entity's full contract set in insertion order.
    pub fn contracts(&self, id: &str) -> Option<&[Contract]> {
        self.entities.get(id).map(Vec::as_slice)
    }

    pub fn list_with(&self, kind: ContractKind) -> Vec<EntityId> {
        self.index
            .get(&kind)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Intersection across the inverted index.
    pub fn list_with_all(&self, kinds: &[ContractKind]) -> Vec<EntityId> {
        let Some((first, rest)) = kinds.split_first() else {
            return Vec::new();
        };
        let Some(base) = self.index.get(first) else {
            return Vec::new();
        };
        base.iter()
            .filter(|id| {
                rest.iter()
                    .all(|k| self.index.get(k).is_some_and(|s| s.contains(*id)))
            })
            .cloned()
            .collect()
    }

    /// Union across the inverted index.
    pub fn list_with_any(&self, kinds: &[ContractKind]) -> Vec<EntityId> {
        let mut out: HashSet<&EntityId> = HashSet::new();
        for kind in kinds {
            if let Some(set) = self.index.get(kind) {
                out.extend(set.iter());
            }
        }
        out.into_iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Typed accessors used throughout the systems
    // -----------------------------------------------------------------------

    pub fn position(&self, id: &str) -> Option<Vec3> {
        match self.get(id, ContractKind::Mobility)? {
            Contract::Mobility { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Entity-local shape box, regardless of geometry tag.
    pub fn local_shape(&self, id: &str) -> Option<Aabb> {
        match self.get(id, ContractKind::Shape)? {
            Contract::Shape { min, max, .. } => Some(Aabb::new(*min, *max)),
            _ => None,
        }
    }

    /// World-space shape box at the entity's current position.
    pub fn world_shape(&self, id: &str) -> Option<Aabb> {
        let local = self.local_shape(id)?;
        let position = self.position(id)?;
        Some(local.translated(position))
    }

    pub fn is_solid(&self, id: &str) -> bool {
        matches!(
            self.get(id, ContractKind::Solidity),
            Some(Contract::Solidity { solid: true, .. })
        )
    }
}
