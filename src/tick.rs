//! Tick scheduler: fixed-rate driver for the simulation systems.
//!
//! Single-threaded cooperative: each tick locks the core, runs movement
//! then durability to completion, and releases. dt is the wall-clock delta
//! clamped to `max_delta_time_ms`; clamping events are counted as lag.
//! The loop is cancellable at tick boundaries only, via a watch channel.

use crate::config::WorldConfig;
use crate::service::WorldCore;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    /// Ticks whose raw dt exceeded the clamp.
    pub lagged_ticks: u64,
    pub last_dt: f32,
    pub max_dt: f32,
}

pub struct TickScheduler {
    config: Arc<WorldConfig>,
    metrics: Arc<Mutex<TickMetrics>>,
}

impl TickScheduler {
    pub fn new(config: Arc<WorldConfig>) -> Self {
        Self {
            config,
            metrics: Arc::new(Mutex::new(TickMetrics::default())),
        }
    }

    pub fn metrics(&self) -> TickMetrics {
        self.metrics.lock().clone()
    }

    /// Start the tick loop, or return `None` when `tick_rate_disabled` is
    /// set (the world becomes purely event-driven).
    pub fn spawn(
        &self,
        core: Arc<Mutex<WorldCore>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if self.config.tick_rate_disabled {
            debug!("Tick loop disabled; world is event-driven");
            return None;
        }

        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(config.tick_interval());
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let max_dt = config.max_delta_time().as_secs_f32();
            let mut last = Instant::now();

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let now = Instant::now();
                        let raw = now.duration_since(last).as_secs_f32();
                        last = now;
                        let dt = raw.min(max_dt);

                        // Hold the lock only for the tick itself.
                        core.lock().tick(dt);

                        let mut m = metrics.lock();
                        m.total_ticks += 1;
                        m.last_dt = dt;
                        m.max_dt = m.max_dt.max(raw);
                        if raw > max_dt {
                            m.lagged_ticks += 1;
                            warn!("Tick lagged: {:.1}ms clamped to {:.1}ms",
                                raw * 1000.0, max_dt * 1000.0);
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("Tick loop stopping");
                        break;
                    }
                }
            }
        }))
    }
}
