use clap::Parser;
use edgewise::app::{Config, Orchestrator};
use edgewise::domain::TradingMode;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "edgewise", about = "Event-driven triangular and basis arbitrage engine")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    config: std::path::PathBuf,

    /// Required acknowledgement for live trading.
    #[arg(long)]
    confirm_live: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    config.init_logging();

    if config.system.trading_mode == TradingMode::Live {
        if config.system.require_live_confirmation && !cli.confirm_live {
            error!("LIVE trading requires --confirm-live");
            std::process::exit(1);
        }
        warn!("=== LIVE TRADING ACTIVE ===");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Runs until the shutdown signal flips, then drains: cancels open
    // orders, closes gateways, closes the bus.
    if let Err(e) = Orchestrator::run(config, shutdown_rx).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }

    info!("edgewise stopped");
}
