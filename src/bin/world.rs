//! atlas-world-server binary
//!
//! Starts the world engine and serves WebSocket clients.
//!
//! ## Configuration (CLI / env / TOML via the `config` crate)
//!
//! | Key                 | Default          | Description                    |
//! |---------------------|------------------|--------------------------------|
//! | `WORLD_BIND`        | `127.0.0.1:9000` | WebSocket listen address       |
//! | `WORLD_CONFIG_FILE` | *(none)*         | Optional TOML config file      |
//! | `WORLD_DATA_DIR`    | `data`           | Save/load directory            |
//! | `WORLD_CHUNK_SIZE`  | `32`             | Default-layer chunk size       |
//! | `WORLD_TARGET_FPS`  | `60`             | Simulation tick rate           |
//!
//! Every option of `WorldConfig` can also be set in the TOML file or as
//! `WORLD_<OPTION>` in the environment.

use anyhow::Result;
use atlas_world::{
    config::WorldConfig,
    events::EventHub,
    persist,
    server::WorldServer,
    service::WorldCore,
    session::Outbox,
};
use clap::Parser;
use parking_lot::Mutex;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "atlas-world-server", about = "Atlas World Engine", version)]
struct Args {
    /// WebSocket listen address
    #[arg(long, env = "WORLD_BIND", default_value = "127.0.0.1:9000")]
    bind: String,

    /// Optional TOML config file
    #[arg(long, env = "WORLD_CONFIG_FILE")]
    config_file: Option<String>,

    /// Save/load directory (overrides config)
    #[arg(long, env = "WORLD_DATA_DIR")]
    data_dir: Option<String>,

    /// Default-layer chunk size (overrides config)
    #[arg(long, env = "WORLD_CHUNK_SIZE")]
    chunk_size: Option<f32>,

    /// Simulation tick rate in Hz (overrides config)
    #[arg(long, env = "WORLD_TARGET_FPS")]
    target_fps: Option<f32>,

    /// Skip loading the existing save file
    #[arg(long, env = "WORLD_FRESH", default_value_t = false)]
    fresh: bool,
}

fn load_config(args: &Args) -> Result<WorldConfig> {
    let mut builder = config::Config::builder();
    if let Some(file) = &args.config_file {
        builder = builder.add_source(config::File::with_name(file));
    }
    builder = builder.add_source(config::Environment::with_prefix("WORLD").try_parsing(true));

    let mut cfg: WorldConfig = builder.build()?.try_deserialize()?;

    if let Some(dir) = &args.data_dir {
        cfg.data_directory = dir.into();
    }
    if let Some(size) = args.chunk_size {
        cfg.chunk_size = size;
    }
    if let Some(fps) = args.target_fps {
        cfg.target_fps = fps;
    }
    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("atlas_world=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(load_config(&args)?);

    log::info!(
        "Starting atlas-world-server (bind='{}', chunk_size={}, fps={}, data='{}')",
        args.bind,
        config.chunk_size,
        config.target_fps,
        config.data_directory.display(),
    );

    let outbox = Outbox::new();
    let events = EventHub::default();
    let mut core = WorldCore::new(Arc::clone(&config), outbox, events);

    // Restore the previous world, if any.
    if !args.fresh {
        let path = persist::save_path(&config.data_directory);
        if path.exists() {
            match persist::read_from(&path) {
                Ok(doc) => core.load_document(doc)?,
                Err(e) => log::warn!("Ignoring unreadable save {}: {e}", path.display()),
            }
        }
    }

    let core = Arc::new(Mutex::new(core));
    WorldServer::new(config, core).run(&args.bind).await
}
