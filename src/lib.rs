//! Atlas World Engine
//!
//! A single-process authoritative multiplayer world server: clients connect
//! over WebSocket, subscribe to spatial chunks of a shared 3D world, and
//! observe versioned streams of entity state as they and others act.
//!
//! ## Architecture
//!
//! ```text
//! WorldServer  (server.rs)   ← transport: accept loop, heartbeats, tasks
//!   └── WorldCore  (service.rs)  ← serialized mutation surface, dispatch
//!         ├── EntityStore      (store.rs)      ← contracts + inverted index
//!         ├── LayerRegistry    (layer.rs)      ← named worlds
//!         ├── ChunkManager     (chunk.rs)      ← membership, versions, fan-out
//!         ├── MovementSystem   (movement.rs)   ← swept AABB, integrator
//!         ├── DurabilitySystem (durability.rs) ← damage, destruction
//!         ├── ArchetypeCatalog (archetype.rs)  ← templates + spawner
//!         └── SessionManager   (session.rs)    ← bindings, subscriptions
//! ```
//!
//! `TickScheduler` (tick.rs) drives Movement then Durability each tick;
//! `persist` round-trips the world through a versioned JSON document;
//! `events::EventHub` carries developer events for diagnostics.

pub mod archetype;
pub mod chunk;
pub mod config;
pub mod contract;
pub mod durability;
pub mod error;
pub mod events;
pub mod layer;
pub mod movement;
pub mod persist;
pub mod protocol;
pub mod server;
pub mod service;
pub mod session;
pub mod spatial;
pub mod store;
pub mod tick;
pub mod types;

// Convenience re-exports
pub use config::WorldConfig;
pub use contract::{Contract, ContractKind, SchemaRegistry};
pub use error::{Result, WorldError};
pub use server::WorldServer;
pub use service::WorldCore;
pub use store::EntityStore;
pub use types::{Aabb, ChunkKey, EntityId, SessionId, Vec3, WorldStats};
