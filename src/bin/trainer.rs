//! Trainer binary: `trainer [COIN] [reprocess_yes|reprocess_no]`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use pattern_trader::exchange::BinanceClient;
use pattern_trader::health::HealthMonitor;
use pattern_trader::paths::ProjectPaths;
use pattern_trader::trainer::Trainer;

#[derive(Parser)]
#[command(name = "trainer", about = "Builds and self-tunes pattern memories for one coin")]
struct Cli {
    /// Coin to train (default BTC).
    coin: Option<String>,

    /// `reprocess_yes` to wipe and rebuild from scratch; anything else (or
    /// omitted) resumes/adjusts in place.
    reprocess: Option<String>,

    #[arg(long = "base-dir")]
    base_dir: Option<PathBuf>,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let base_dir = cli.base_dir.unwrap_or_else(|| std::env::current_dir().expect("current working directory"));
    let _guard = pattern_trader::logging::init(&base_dir, "trainer", cli.verbose);

    let coin = cli.coin.unwrap_or_else(|| "BTC".to_string()).to_uppercase();
    let reprocess = cli.reprocess.as_deref() == Some("reprocess_yes");

    let paths = ProjectPaths::new(base_dir);
    let health = Arc::new(HealthMonitor::new());
    let market = Arc::new(BinanceClient::public_only());
    let trainer = Trainer::new(market, paths, health);

    info!(coin, reprocess, "trainer starting");

    let result = tokio::select! {
        result = trainer.train(&[coin], reprocess) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, trainer stopping after current step");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(error = %e, "trainer exited with error");
        std::process::exit(1);
    }
}
