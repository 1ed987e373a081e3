//! Contract (component) model and schema validation.
//!
//! Every facet of entity behavior is a *contract*: a tagged record
//! discriminated by its `kind` field. The set of kinds is closed; see
//! [`Contract`]; but validation dispatches through a per-kind validator
//! table ([`SchemaRegistry`]) so tests can register replacement schemas.
//!
//! ## Wire form
//!
//! | Rule | |
//! |---|---|
//! | Discriminator | `"kind"`, snake_case |
//! | Field names   | camelCase |
//! | Unknown kinds | rejected at deserialization |
//!
//! A contract passes [`SchemaRegistry::validate`] before it is observable
//! to any reader; failure is a client-visible `InvalidContract` error and is
//! never downgraded to a warning.

use crate::error::{Result, WorldError};
use crate::types::{EntityId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Identity,
    Mobility,
    Shape,
    Solidity,
    Visual,
    Entrance,
    Portable,
    Inventory,
    Durability,
    ContractLimit,
    MovementRules,
    WorldConditions,
    WorldCommands,
    CommandAccess,
}

impl ContractKind {
    pub const ALL: [ContractKind; 14] = [
        ContractKind::Identity,
        ContractKind::Mobility,
        ContractKind::Shape,
        ContractKind::Solidity,
        ContractKind::Visual,
        ContractKind::Entrance,
        ContractKind::Portable,
        ContractKind::Inventory,
        ContractKind::Durability,
        ContractKind::ContractLimit,
        ContractKind::MovementRules,
        ContractKind::WorldConditions,
        ContractKind::WorldCommands,
        ContractKind::CommandAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Identity => "identity",
            ContractKind::Mobility => "mobility",
            ContractKind::Shape => "shape",
            ContractKind::Solidity => "solidity",
            ContractKind::Visual => "visual",
            ContractKind::Entrance => "entrance",
            ContractKind::Portable => "portable",
            ContractKind::Inventory => "inventory",
            ContractKind::Durability => "durability",
            ContractKind::ContractLimit => "contract_limit",
            ContractKind::MovementRules => "movement_rules",
            ContractKind::WorldConditions => "world_conditions",
            ContractKind::WorldCommands => "world_commands",
            ContractKind::CommandAccess => "command_access",
        }
    }
}

impl std::fmt::Display for ContractKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContractKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        ContractKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or(())
    }
}

// ---------------------------------------------------------------------------
// Enumerated field domains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    Box,
    Sphere,
    Cylinder,
    Mesh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    Clear,
    Rain,
    Snow,
    Storm,
    Fog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Dawn,
    Day,
    Dusk,
    Night,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The closed tagged sum of every recognized contract kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Contract {
    Identity {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Mobility {
        position: Vec3,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        velocity: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_speed: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        acceleration: Option<f32>,
    },
    /// Entity-local bounding box plus a geometry tag. Only `box` geometry
    /// participates in collision.
    Shape {
        min: Vec3,
        max: Vec3,
        geometry: Geometry,
    },
    Solidity {
        solid: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collision_groups: Option<Vec<String>>,
    },
    Visual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        texture: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        material: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        visible: Option<bool>,
    },
    Entrance {
        target_layer: String,
        target_position: Vec3,
        enabled: bool,
    },
    Portable {
        can_pickup: bool,
        weight: f32,
    },
    Inventory {
        items: Vec<EntityId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capacity: Option<u32>,
    },
    Durability {
        health: f32,
        max_health: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        armor: Option<f32>,
    },
    /// Per-entity cardinality overrides, keyed by contract kind name.
    ContractLimit {
        limits: HashMap<String, u32>,
    },
    MovementRules {
        step_distance: f32,
        allow_diagonal: bool,
        diagonal_normalized: bool,
    },
    WorldConditions {
        gravity: f32,
        weather: Weather,
        time_of_day: TimeOfDay,
        terrain_seed: u64,
        #[serde(default)]
        properties: HashMap<String, serde_json::Value>,
    },
    /// Allow-list of command names the world advertises.
    WorldCommands {
        commands: Vec<String>,
    },
    /// Allow-list of commands granted to this entity.
    CommandAccess {
        commands: Vec<String>,
    },
}

impl Contract {
    pub fn kind(&self) -> ContractKind {
        match self {
            Contract::Identity { .. } => ContractKind::Identity,
            Contract::Mobility { .. } => ContractKind::Mobility,
            Contract::Shape { .. } => ContractKind::Shape,
            Contract::Solidity { .. } => ContractKind::Solidity,
            Contract::Visual { .. } => ContractKind::Visual,
            Contract::Entrance { .. } => ContractKind::Entrance,
            Contract::Portable { .. } => ContractKind::Portable,
            Contract::Inventory { .. } => ContractKind::Inventory,
            Contract::Durability { .. } => ContractKind::Durability,
            Contract::ContractLimit { .. } => ContractKind::ContractLimit,
            Contract::MovementRules { .. } => ContractKind::MovementRules,
            Contract::WorldConditions { .. } => ContractKind::WorldConditions,
            Contract::WorldCommands { .. } => ContractKind::WorldCommands,
            Contract::CommandAccess { .. } => ContractKind::CommandAccess,
        }
    }

    /// Built-in field-domain checks. Error messages carry the offending
    /// field path (`"durability.maxHealth: must be positive"`).
    fn check_fields(&self) -> std::result::Result<(), String> {
        fn positive(path: &str, v: f32) -> std::result::Result<(), String> {
            if v > 0.0 {
                Ok(())
            } else {
                Err(format!("{path}: must be positive"))
            }
        }
        fn non_negative(path: &str, v: f32) -> std::result::Result<(), String> {
            if v >= 0.0 {
                Ok(())
            } else {
                Err(format!("{path}: must be non-negative"))
            }
        }

        match self {
            Contract::Identity { id, .. } => {
                if id.is_empty() {
                    return Err("identity.id: must not be empty".into());
                }
            }
            Contract::Mobility {
                max_speed,
                acceleration,
                ..
            } => {
                if let Some(s) = max_speed {
                    positive("mobility.maxSpeed", *s)?;
                }
                if let Some(a) = acceleration {
                    positive("mobility.acceleration", *a)?;
                }
            }
            Contract::Shape { min, max, .. } => {
                if min.x > max.x || min.y > max.y || min.z > max.z {
                    return Err("shape.min: must be component-wise <= shape.max".into());
                }
            }
            Contract::Solidity { .. } | Contract::Visual { .. } => {}
            Contract::Entrance { target_layer, .. } => {
                if target_layer.is_empty() {
                    return Err("entrance.targetLayer: must not be empty".into());
                }
            }
            Contract::Portable { weight, .. } => {
                non_negative("portable.weight", *weight)?;
            }
            Contract::Inventory { items, capacity } => {
                if let Some(cap) = capacity {
                    if items.len() > *cap as usize {
                        return Err("inventory.items: exceeds capacity".into());
                    }
                }
            }
            Contract::Durability {
                health,
                max_health,
                armor,
            } => {
                positive("durability.maxHealth", *max_health)?;
                non_negative("durability.health", *health)?;
                if health > max_health {
                    return Err("durability.health: must be <= durability.maxHealth".into());
                }
                if let Some(a) = armor {
                    non_negative("durability.armor", *a)?;
                }
            }
            Contract::ContractLimit { limits } => {
                for (kind, max) in limits {
                    if kind.parse::<ContractKind>().is_err() {
                        return Err(format!("contractLimit.limits.{kind}: unknown kind"));
                    }
                    if *max == 0 {
                        return Err(format!("contractLimit.limits.{kind}: must be positive"));
                    }
                }
            }
            Contract::MovementRules { step_distance, .. } => {
                positive("movementRules.stepDistance", *step_distance)?;
            }
            Contract::WorldConditions { .. } => {}
            Contract::WorldCommands { commands } | Contract::CommandAccess { commands } => {
                if commands.iter().any(|c| c.is_empty()) {
                    return Err("commands: names must not be empty".into());
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Schema registry
// ---------------------------------------------------------------------------

pub type Validator = Box<dyn Fn(&Contract) -> std::result::Result<(), String> + Send + Sync>;

/// Per-kind validator table plus cardinality resolution.
///
/// Built at startup with the built-in schemas and immutable thereafter,
/// except that tests may [`register`](SchemaRegistry::register) replacement
/// validators.
pub struct SchemaRegistry {
    validators: HashMap<ContractKind, Validator>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let mut validators: HashMap<ContractKind, Validator> = HashMap::new();
        for kind in ContractKind::ALL {
            validators.insert(kind, Box::new(|c: &Contract| c.check_fields()));
        }
        Self { validators }
    }

    /// Replace the validator for `kind` (test-time schema registration).
    pub fn register(&mut self, kind: ContractKind, validator: Validator) {
        self.validators.insert(kind, validator);
    }

    pub fn validate(&self, contract: &Contract) -> Result<()> {
        let kind = contract.kind();
        match self.validators.get(&kind) {
            Some(v) => v(contract).map_err(WorldError::InvalidContract),
            None => Err(WorldError::InvalidContract(format!(
                "{kind}: no schema registered"
            ))),
        }
    }

    /// Global default cardinality ceiling for `kind`; `None` means
    /// unbounded.
    pub fn default_max(kind: ContractKind) -> Option<u32> {
        match kind {
            ContractKind::Portable => Some(3),
            _ => Some(1),
        }
    }

    /// Ceiling for `kind` on an entity carrying `limit_override` (that
    /// entity's `contract_limit` contract, if any).
    pub fn max_for(limit_override: Option<&Contract>, kind: ContractKind) -> Option<u32> {
        if let Some(Contract::ContractLimit { limits }) = limit_override {
            if let Some(max) = limits.get(kind.as_str()) {
                return Some(*max);
            }
        }
        Self::default_max(kind)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
