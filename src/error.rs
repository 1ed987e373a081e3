//! Error types.
//!
//! Four families: **validation** errors are client-visible and non-fatal;
//! **authorization** errors reject the command without touching state;
//! **invariant** errors surface as typed failures; **transport** errors
//! terminate the offending session. A blocked movement is *not* an error -
//! it is a normal `move_result { success: false }` outcome.

use crate::contract::ContractKind;
use crate::protocol::ServerMessage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorldError>;

#[derive(Debug, Error)]
pub enum WorldError {
    // -- invariant ---------------------------------------------------------
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("entity '{0}' already exists")]
    AlreadyExists(String),

    #[error("contract limit exceeded for '{kind}' on entity '{entity}'")]
    LimitExceeded { entity: String, kind: ContractKind },

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("layer '{0}' cannot be removed")]
    ProtectedLayer(String),

    #[error("unknown archetype '{0}'")]
    UnknownArchetype(String),

    // -- validation --------------------------------------------------------
    /// The message names the offending field path, e.g.
    /// `"mobility.maxSpeed: must be positive"`.
    #[error("invalid contract: {0}")]
    InvalidContract(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    // -- authorization -----------------------------------------------------
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not authenticated")]
    NotAuthenticated,

    // -- transport / persistence -------------------------------------------
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported save document version {0}")]
    UnsupportedSaveVersion(u32),
}

impl WorldError {
    /// Client-visible error code for the wire `error {code, message}` reply.
    /// This table is the single mapping from typed errors to wire codes;
    /// every error reply built from a `WorldError` goes through
    /// [`WorldError::to_reply`].
    pub fn wire_code(&self) -> &'static str {
        match self {
            WorldError::UnknownEntity(_) => "CONTRACT_NOT_FOUND",
            WorldError::AlreadyExists(_) => "JOIN_FAILED",
            WorldError::LimitExceeded { .. } => "ADD_CONTRACT_FAILED",
            WorldError::UnknownLayer(_) => "JOIN_FAILED",
            WorldError::ProtectedLayer(_) => "FORBIDDEN",
            WorldError::UnknownArchetype(_) => "JOIN_FAILED",
            WorldError::InvalidContract(_) => "ADD_CONTRACT_FAILED",
            WorldError::InvalidMessage(_) => "INVALID_MESSAGE",
            WorldError::Forbidden(_) => "FORBIDDEN",
            WorldError::PermissionDenied(_) => "PERMISSION_DENIED",
            WorldError::NotAuthenticated => "NOT_AUTHENTICATED",
            WorldError::Io(_) | WorldError::Serde(_) | WorldError::UnsupportedSaveVersion(_) => {
                "INVALID_MESSAGE"
            }
        }
    }

    /// The wire `error` reply for this error.
    pub fn to_reply(&self) -> ServerMessage {
        ServerMessage::error(self.wire_code(), self.to_string())
    }
}
