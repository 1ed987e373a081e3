//! Immutable server configuration.
//!
//! One [`WorldConfig`] record is assembled at startup (defaults, optional
//! TOML file, `WORLD_*` environment; see the binary) and never mutated
//! afterwards; modules hold it behind an `Arc`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    // -- spatial ------------------------------------------------------------
    /// Horizontal chunk size (world units) for the seeded `default` layer.
    pub chunk_size: f32,
    /// Vertical chunk extent, shared by every layer.
    pub chunk_height: f32,
    /// Static occupancy grid resolution per axis.
    pub occupancy_resolution: usize,

    // -- chunk lifecycle ----------------------------------------------------
    pub max_loaded_chunks: usize,
    pub chunk_unload_delay_ms: u64,
    pub max_retained_chunks: usize,
    /// Cadence of the unload/retention/subscriber-pruning task.
    pub eviction_interval_ms: u64,

    // -- tick ---------------------------------------------------------------
    pub target_fps: f32,
    pub max_delta_time_ms: u64,
    /// Purely event-driven mode: no tick loop, no gravity/friction.
    pub tick_rate_disabled: bool,

    // -- transport ----------------------------------------------------------
    pub ws_heartbeat_ms: u64,
    pub ws_connection_timeout_ms: u64,
    pub max_subs_per_client: usize,
    pub max_message_size: usize,
    pub max_messages_per_second: u32,
    pub max_concurrent_connections: usize,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,

    // -- physics ------------------------------------------------------------
    pub gravity: f32,
    pub terminal_velocity: f32,
    pub ground_friction: f32,
    pub air_friction: f32,
    pub collision_epsilon: f32,

    // -- persistence --------------------------------------------------------
    pub data_directory: PathBuf,
    pub auto_save_interval_ms: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32.0,
            chunk_height: 256.0,
            occupancy_resolution: 16,

            max_loaded_chunks: 1000,
            chunk_unload_delay_ms: 60_000,
            max_retained_chunks: 20_000,
            eviction_interval_ms: 30_000,

            target_fps: 60.0,
            max_delta_time_ms: 100,
            tick_rate_disabled: false,

            ws_heartbeat_ms: 30_000,
            ws_connection_timeout_ms: 60_000,
            max_subs_per_client: 100,
            max_message_size: 65_536,
            max_messages_per_second: 60,
            max_concurrent_connections: 256,
            rate_limit_window_ms: 1_000,
            rate_limit_max_requests: 60,

            gravity: -9.81,
            terminal_velocity: -53.0,
            ground_friction: 0.8,
            air_friction: 0.98,
            collision_epsilon: 0.001,

            data_directory: PathBuf::from("data"),
            auto_save_interval_ms: 300_000,
        }
    }
}

impl WorldConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.target_fps.max(1.0))
    }

    pub fn max_delta_time(&self) -> Duration {
        Duration::from_millis(self.max_delta_time_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.ws_heartbeat_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_connection_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn chunk_unload_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_unload_delay_ms)
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(self.auto_save_interval_ms)
    }
}
