//! Wire protocol: every message that crosses the WebSocket boundary.
//!
//! Each frame is exactly one JSON object with a `type` field.
//!
//! ## Design rules
//!
//! 1. Message and delta discriminators are snake_case; field names are
//!    camelCase.
//! 2. Unknown fields on inbound messages are ignored; an unknown `type`
//!    classifies as `UNKNOWN_MESSAGE_TYPE` and a malformed known message as
//!    `INVALID_MESSAGE`.
//! 3. Chunk-scoped traffic carries the chunk's post-mutation version so
//!    clients can detect drop/replay.

use crate::contract::Contract;
use crate::types::{ChunkKey, EntityId, Vec3};
use serde::{Deserialize, Serialize};

/// Commands every player may issue; the player factory grants exactly this
/// set as `command_access`.
pub const BASE_COMMANDS: [&str; 10] = [
    "login",
    "logout",
    "set_view",
    "subscribe_chunks",
    "unsubscribe_chunks",
    "move",
    "move_dir",
    "add_contract",
    "remove_contract",
    "interact",
];

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Unit displacement: north = −z, south = +z, west = −x, east = +x.
    pub fn unit(&self) -> Vec3 {
        match self {
            Direction::North => Vec3::new(0.0, 0.0, -1.0),
            Direction::South => Vec3::new(0.0, 0.0, 1.0),
            Direction::West => Vec3::new(-1.0, 0.0, 0.0),
            Direction::East => Vec3::new(1.0, 0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Optional greeting; the server sends `hello_ok` on connect regardless.
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    Login {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_name: Option<String>,
    },
    Logout {},
    SetView {
        radius: f32,
    },
    SubscribeChunks {
        chunk_keys: Vec<ChunkKey>,
    },
    UnsubscribeChunks {
        chunk_keys: Vec<ChunkKey>,
    },
    Move {
        want: Vec3,
    },
    /// Up to two cardinal directions, translated into a `stepDistance`
    /// displacement server-side.
    MoveDir {
        directions: Vec<Direction>,
    },
    AddContract {
        entity_id: EntityId,
        contract: Contract,
    },
    RemoveContract {
        entity_id: EntityId,
        contract_type: String,
    },
    Interact {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<EntityId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

impl ClientMessage {
    /// Command name checked against world/player allow-lists.
    pub fn command_name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "hello",
            ClientMessage::Login { .. } => "login",
            ClientMessage::Logout {} => "logout",
            ClientMessage::SetView { .. } => "set_view",
            ClientMessage::SubscribeChunks { .. } => "subscribe_chunks",
            ClientMessage::UnsubscribeChunks { .. } => "unsubscribe_chunks",
            ClientMessage::Move { .. } => "move",
            ClientMessage::MoveDir { .. } => "move_dir",
            ClientMessage::AddContract { .. } => "add_contract",
            ClientMessage::RemoveContract { .. } => "remove_contract",
            ClientMessage::Interact { .. } => "interact",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// One entity's full contract set inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub id: EntityId,
    pub contracts: Vec<Contract>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    EntityAdd,
    EntityRemove,
    EntityUpdate,
}

/// Incremental chunk change; `contracts` accompanies add/update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDelta {
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts: Option<Vec<Contract>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    HelloOk {
        client_id: String,
        server_id: String,
        server_version: String,
    },
    LoginOk {
        player_id: EntityId,
        layer_id: String,
    },
    LogoutOk {},
    SetViewOk {
        radius: f32,
    },
    ChunkSnapshot {
        chunk_key: ChunkKey,
        entities: Vec<EntityState>,
        version: u64,
    },
    ChunkDelta {
        chunk_key: ChunkKey,
        delta: ChunkDelta,
        version: u64,
    },
    EntitySpawn {
        entity_id: EntityId,
        contracts: Vec<Contract>,
        chunk_key: ChunkKey,
    },
    EntityUpdate {
        entity_id: EntityId,
        contracts: Vec<Contract>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_key: Option<ChunkKey>,
    },
    EntityDespawn {
        entity_id: EntityId,
        chunk_key: ChunkKey,
    },
    MoveResult {
        success: bool,
        position: Vec3,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound parsing
// ---------------------------------------------------------------------------

/// Parse failure classified with its wire error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct WireError {
    pub code: &'static str,
    pub message: String,
}

const KNOWN_TYPES: [&str; 11] = [
    "hello",
    "login",
    "logout",
    "set_view",
    "subscribe_chunks",
    "unsubscribe_chunks",
    "move",
    "move_dir",
    "add_contract",
    "remove_contract",
    "interact",
];

/// Decode one inbound frame.
///
/// Distinguishes an unrecognized `type` (`UNKNOWN_MESSAGE_TYPE`) from a
/// recognized message with bad fields (`INVALID_MESSAGE`).
pub fn parse_client_message(text: &str) -> Result<ClientMessage, WireError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| WireError {
        code: "INVALID_MESSAGE",
        message: format!("not a JSON object: {e}"),
    })?;

    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| WireError {
            code: "INVALID_MESSAGE",
            message: "missing 'type' field".to_owned(),
        })?;

    if !KNOWN_TYPES.contains(&msg_type) {
        return Err(WireError {
            code: "UNKNOWN_MESSAGE_TYPE",
            message: format!("unknown message type '{msg_type}'"),
        });
    }

    serde_json::from_value(value).map_err(|e| WireError {
        code: "INVALID_MESSAGE",
        message: e.to_string(),
    })
}
