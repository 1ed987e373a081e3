//! Persistence: the versioned JSON save document and file helpers.
//!
//! Save-then-load restores the full entity, layer, and archetype sets plus
//! the `playerCounter` metadata; entity ids are preserved. Documents with
//! an unrecognized version are refused rather than partially applied.

use crate::archetype::Archetype;
use crate::contract::ContractKind;
use crate::error::{Result, WorldError};
use crate::layer::Layer;
use crate::service::WorldCore;
use crate::types::EntityId;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SAVE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEntity {
    pub id: EntityId,
    pub layer_id: String,
    pub contracts: Vec<crate::contract::Contract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub player_counter: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDocument {
    pub version: u32,
    /// Unix milliseconds at save time.
    pub timestamp: u64,
    pub layers: Vec<Layer>,
    pub archetypes: Vec<Archetype>,
    pub entities: Vec<SavedEntity>,
    pub metadata: SaveMetadata,
}

impl WorldCore {
    /// Snapshot the full world into a save document.
    pub fn save_document(&self) -> SaveDocument {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let entities = self
            .store
            .ids()
            .map(|id| SavedEntity {
                id: id.clone(),
                layer_id: self.layers.entity_layer(id).to_owned(),
                contracts: self.store.contracts(id).map(<[_]>::to_vec).unwrap_or_default(),
            })
            .collect();

        SaveDocument {
            version: SAVE_VERSION,
            timestamp,
            layers: self.layers.list().into_iter().cloned().collect(),
            archetypes: self.archetypes.list().into_iter().cloned().collect(),
            entities,
            metadata: SaveMetadata {
                player_counter: self.player_counter,
            },
        }
    }

    /// Restore a save document into this core.
    ///
    /// Layers and archetypes are (re)defined; entities are recreated with
    /// their original ids and placed into their chunks. An entity id that
    /// already exists is skipped with a warning rather than aborting the
    /// whole load.
    pub fn load_document(&mut self, doc: SaveDocument) -> Result<()> {
        if doc.version != SAVE_VERSION {
            return Err(WorldError::UnsupportedSaveVersion(doc.version));
        }

        for layer in doc.layers {
            self.layers.create(layer)?;
        }
        for archetype in doc.archetypes {
            self.archetypes.define(archetype);
        }

        for saved in doc.entities {
            let has_mobility = saved
                .contracts
                .iter()
                .any(|c| c.kind() == ContractKind::Mobility);
            match self.store.create(&saved.id, saved.contracts) {
                Ok(()) => {
                    self.layers.set_entity_layer(&saved.id, &saved.layer_id);
                    if has_mobility {
                        if let Some(key) = self.chunk_key_of(&saved.id) {
                            self.chunks.add_entity(&saved.id, &key, &self.store);
                        }
                    }
                }
                Err(e) => warn!("Skipping saved entity {}: {e}", saved.id),
            }
        }

        self.player_counter = self.player_counter.max(doc.metadata.player_counter);
        info!(
            "Loaded save (timestamp {}): {} entities, {} layers",
            doc.timestamp,
            self.store.len(),
            self.layers.len()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

pub fn save_path(data_directory: &Path) -> PathBuf {
    data_directory.join("world.json")
}

pub fn write_to(path: &Path, doc: &SaveDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_from(path: &Path) -> Result<SaveDocument> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
