//! Layer registry: named worlds, each an independent coordinate space with
//! its own chunk size, gravity, and spawn point.
//!
//! The `default` layer is seeded at construction and cannot be deleted.
//! Which layer an entity belongs to is tracked here as a side index rather
//! than on the entity itself; per-layer queries and snapshots read the
//! index.

use crate::error::{Result, WorldError};
use crate::types::{Aabb, EntityId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_LAYER: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub chunk_size: f32,
    pub gravity: f32,
    pub spawn_point: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Aabb>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

pub struct LayerRegistry {
    layers: HashMap<String, Layer>,
    /// Side index: entity → owning layer.
    memberships: HashMap<EntityId, String>,
}

impl LayerRegistry {
    /// Registry seeded with the `default` layer.
    pub fn new(default_chunk_size: f32, default_gravity: f32) -> Self {
        let mut layers = HashMap::new();
        layers.insert(
            DEFAULT_LAYER.to_owned(),
            Layer {
                id: DEFAULT_LAYER.to_owned(),
                name: "Default".to_owned(),
                chunk_size: default_chunk_size,
                gravity: default_gravity,
                spawn_point: Vec3::new(0.0, 10.0, 0.0),
                bounds: None,
                properties: HashMap::new(),
            },
        );
        Self {
            layers,
            memberships: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Layer CRUD
    // -----------------------------------------------------------------------

    pub fn create(&mut self, layer: Layer) -> Result<()> {
        if layer.chunk_size <= 0.0 {
            return Err(WorldError::InvalidContract(
                "layer.chunkSize: must be positive".into(),
            ));
        }
        self.layers.insert(layer.id.clone(), layer);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.layers.contains_key(id)
    }

    pub fn list(&self) -> Vec<&Layer> {
        self.layers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        if id == DEFAULT_LAYER {
            return Err(WorldError::ProtectedLayer(id.to_owned()));
        }
        if self.layers.remove(id).is_none() {
            return Err(WorldError::UnknownLayer(id.to_owned()));
        }
        self.memberships.retain(|_, layer| layer.as_str() != id);
        Ok(())
    }

    /// Chunk size for a layer, falling back to the default layer's.
    pub fn chunk_size_of(&self, id: &str) -> f32 {
        self.layers
            .get(id)
            .or_else(|| self.layers.get(DEFAULT_LAYER))
            .map(|l| l.chunk_size)
            .unwrap_or(32.0)
    }

    pub fn gravity_of(&self, id: &str) -> f32 {
        self.layers
            .get(id)
            .or_else(|| self.layers.get(DEFAULT_LAYER))
            .map(|l| l.gravity)
            .unwrap_or(-9.81)
    }

    // -----------------------------------------------------------------------
    // Entity membership side index
    // -----------------------------------------------------------------------

    pub fn set_entity_layer(&mut self, entity: impl Into<EntityId>, layer: impl Into<String>) {
        self.memberships.insert(entity.into(), layer.into());
    }

    pub fn entity_layer(&self, entity: &str) -> &str {
        self.memberships
            .get(entity)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LAYER)
    }

    pub fn forget_entity(&mut self, entity: &str) {
        self.memberships.remove(entity);
    }

    pub fn entities_in(&self, layer: &str) -> Vec<EntityId> {
        self.memberships
            .iter()
            .filter(|(_, l)| l.as_str() == layer)
            .map(|(e, _)| e.clone())
            .collect()
    }
}
