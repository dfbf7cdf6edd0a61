//! Thinker binary: takes no positional arguments.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use pattern_trader::config::ConfigHandle;
use pattern_trader::exchange::BinanceClient;
use pattern_trader::health::HealthMonitor;
use pattern_trader::paths::ProjectPaths;
use pattern_trader::thinker::Thinker;

#[derive(Parser)]
#[command(name = "thinker", about = "Drives the signal engine for every tracked coin")]
struct Cli {
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
    let _guard = pattern_trader::logging::init(&base_dir, "thinker", cli.verbose);

    let paths = ProjectPaths::new(base_dir);
    let config = Arc::new(ConfigHandle::new(paths.settings_file()));
    let health = Arc::new(HealthMonitor::new());
    let market = Arc::new(BinanceClient::public_only());
    let thinker = Thinker::new(market, paths, config, health);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, thinker stopping");
        stop_signal.store(true, Ordering::Relaxed);
    });

    info!("thinker starting");
    thinker.run(stop).await;
}
