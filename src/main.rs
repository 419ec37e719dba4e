//! BomBerBox Arena Server
//!
//! Binds the listeners and runs rounds until every player has left or the
//! process is interrupted.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bomberbox::{Config, GameServer, VERSION};

/// Command line arguments. Flags override the configuration file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// TCP address for the binary protocol
    #[clap(short, long)]
    bind: Option<String>,

    /// Also accept WebSocket clients on this address
    #[clap(long)]
    ws_bind: Option<String>,

    /// Directory holding *.map files
    #[clap(long)]
    maps_dir: Option<PathBuf>,

    /// Always play this map
    #[clap(long)]
    map: Option<PathBuf>,

    /// Player slots
    #[clap(long)]
    max_players: Option<usize>,

    /// Tick period in milliseconds
    #[clap(long)]
    tick_ms: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(bind) = self.bind {
            config.server.bind_addr = bind;
        }
        if let Some(ws_bind) = self.ws_bind {
            config.server.ws_bind_addr = Some(ws_bind);
        }
        if let Some(maps_dir) = self.maps_dir {
            config.server.maps_dir = maps_dir;
        }
        if let Some(map) = self.map {
            config.server.map_file = Some(map);
        }
        if let Some(max_players) = self.max_players {
            config.game.max_players = max_players;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.game.tick_period_ms = tick_ms;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("BomBerBox Server v{}", VERSION);

    let config = args.into_config()?;
    info!(
        rows = config.game.rows,
        columns = config.game.columns,
        max_players = config.game.max_players,
        tick_ms = config.game.tick_period_ms,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Cannot listen for interrupts: {}", e);
                // Park with the sender alive: dropping it would read as a shutdown
                let _shutdown_tx = shutdown_tx;
                std::future::pending::<()>().await
            }
        }
    });

    GameServer::new(config, shutdown_rx)
        .run()
        .await
        .context("server stopped")?;

    info!("Server exited");
    Ok(())
}
