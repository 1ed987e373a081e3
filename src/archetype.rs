//! Archetype catalog: entity templates and the spawner that clones them.
//!
//! Cloning rules: the identity's `id` and the mobility's `position` are
//! overwritten at spawn time; per-kind overrides shallow-merge into the
//! cloned record of that kind. The `player` archetype is special-cased to
//! a factory producing the full standard player contract set.

use crate::contract::{Contract, ContractKind, Geometry};
use crate::error::{Result, WorldError};
use crate::protocol::BASE_COMMANDS;
use crate::types::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Archetype id that always resolves to the player factory.
pub const PLAYER_ARCHETYPE: &str = "player";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub contracts: Vec<Contract>,
}

pub struct ArchetypeCatalog {
    archetypes: HashMap<String, Archetype>,
    counter: u64,
}

impl ArchetypeCatalog {
    pub fn new() -> Self {
        Self {
            archetypes: HashMap::new(),
            counter: 0,
        }
    }

    /// Store a template by id; redefining overwrites.
    pub fn define(&mut self, archetype: Archetype) {
        self.archetypes.insert(archetype.id.clone(), archetype);
    }

    pub fn get(&self, id: &str) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    pub fn list(&self) -> Vec<&Archetype> {
        self.archetypes.values().collect()
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    // -----------------------------------------------------------------------
    // Spawning
    // -----------------------------------------------------------------------

    /// Fresh entity id: `<archetypeId>-<unix_ms>-<hash6>`.
    pub fn next_id(&mut self, archetype_id: &str) -> String {
        self.counter += 1;
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let digest = md5::compute(format!("{}-{}-{}", archetype_id, self.counter, ts));
        let hash = format!("{digest:x}");
        format!("{}-{}-{}", archetype_id, ts, &hash[..6])
    }

    /// Clone the template into a concrete contract set for `entity_id` at
    /// `position`, applying per-kind overrides.
    ///
    /// The `player` archetype always resolves to the factory, whether or
    /// not a template with that id was defined.
    pub fn clone_contracts(
        &self,
        archetype_id: &str,
        entity_id: &str,
        position: Vec3,
        overrides: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<Contract>> {
        if archetype_id == PLAYER_ARCHETYPE {
            let name = overrides
                .and_then(|o| o.get("identity"))
                .and_then(|v| v.get("name"))
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            return Ok(player_contracts(entity_id, name, position));
        }

        let template = self
            .archetypes
            .get(archetype_id)
            .ok_or_else(|| WorldError::UnknownArchetype(archetype_id.to_owned()))?;

        let mut out = Vec::with_capacity(template.contracts.len());
        for contract in &template.contracts {
            let mut cloned = contract.clone();

            match &mut cloned {
                Contract::Identity { id, .. } => *id = entity_id.to_owned(),
                Contract::Mobility { position: p, .. } => *p = position,
                _ => {}
            }

            if let Some(patch) = overrides.and_then(|o| o.get(cloned.kind().as_str())) {
                cloned = merge_override(&cloned, patch)?;
            }
            out.push(cloned);
        }
        Ok(out)
    }
}

impl Default for ArchetypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow-merge a JSON override object into a cloned contract. The
/// discriminator cannot be patched away; an override producing an invalid
/// record surfaces as `InvalidContract`.
fn merge_override(contract: &Contract, patch: &serde_json::Value) -> Result<Contract> {
    let mut value = serde_json::to_value(contract)?;
    let serde_json::Value::Object(fields) = &mut value else {
        return Err(WorldError::InvalidContract(
            "contract did not serialize to an object".into(),
        ));
    };
    let serde_json::Value::Object(patch) = patch else {
        return Err(WorldError::InvalidContract(format!(
            "{}: override must be an object",
            contract.kind()
        )));
    };
    for (k, v) in patch {
        if k == "kind" {
            continue;
        }
        fields.insert(k.clone(), v.clone());
    }
    serde_json::from_value(value)
        .map_err(|e| WorldError::InvalidContract(format!("{}: {e}", contract.kind())))
}

// ---------------------------------------------------------------------------
// Player factory
// ---------------------------------------------------------------------------

/// The standard player contract set: identity, mobility, a 0.6×1.8×0.6
/// collision box centered on the position, visual, a 10-slot inventory,
/// 100 durability, step-1 movement rules with normalized diagonals, the
/// base command set, and relaxed entrance/portable limits.
pub fn player_contracts(entity_id: &str, name: Option<String>, position: Vec3) -> Vec<Contract> {
    let half = Vec3::new(0.3, 0.9, 0.3);
    vec![
        Contract::Identity {
            id: entity_id.to_owned(),
            name: Some(name.unwrap_or_else(|| "Player".to_owned())),
            description: None,
        },
        Contract::Mobility {
            position,
            velocity: Some(Vec3::zero()),
            max_speed: None,
            acceleration: None,
        },
        Contract::Shape {
            min: Vec3::zero() - half,
            max: half,
            geometry: Geometry::Box,
        },
        Contract::Visual {
            color: Some("#4a90d9".to_owned()),
            texture: None,
            material: None,
            visible: Some(true),
        },
        Contract::Inventory {
            items: Vec::new(),
            capacity: Some(10),
        },
        Contract::Durability {
            health: 100.0,
            max_health: 100.0,
            armor: None,
        },
        Contract::MovementRules {
            step_distance: 1.0,
            allow_diagonal: true,
            diagonal_normalized: true,
        },
        Contract::CommandAccess {
            commands: BASE_COMMANDS.iter().map(|c| (*c).to_owned()).collect(),
        },
        Contract::ContractLimit {
            limits: HashMap::from([
                (ContractKind::Entrance.as_str().to_owned(), 5),
                (ContractKind::Portable.as_str().to_owned(), 3),
            ]),
        },
    ]
}
