//! Trader binary: `trader [--paper]`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use rust_decimal_macros::dec;
use tracing::{error, info};

use pattern_trader::config::ConfigHandle;
use pattern_trader::credentials;
use pattern_trader::exchange::{BinanceClient, MarketDataSource, PaperVenue, TradingVenue};
use pattern_trader::health::HealthMonitor;
use pattern_trader::paths::ProjectPaths;
use pattern_trader::trader::Trader;

/// Starting simulated quote balance for `--paper` mode.
const PAPER_STARTING_BALANCE: rust_decimal::Decimal = dec!(10000);

#[derive(Parser)]
#[command(name = "trader", about = "Reconciles positions and executes the exit/DCA/entry state machine")]
struct Cli {
    /// Substitute a simulated venue instead of live Binance.US orders.
    #[arg(long)]
    paper: bool,

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
    let _guard = pattern_trader::logging::init(&base_dir, "trader", cli.verbose);

    let paths = ProjectPaths::new(base_dir.clone());
    let config = Arc::new(ConfigHandle::new(paths.settings_file()));
    let health = Arc::new(HealthMonitor::new());

    let market: Arc<dyn MarketDataSource> = Arc::new(BinanceClient::public_only());
    let venue: Arc<dyn TradingVenue> = if cli.paper {
        info!("paper mode: using simulated venue");
        Arc::new(PaperVenue::new(market.clone(), PAPER_STARTING_BALANCE))
    } else {
        match credentials::resolve(&base_dir) {
            Ok(creds) => {
                info!("live mode: resolved venue credentials");
                Arc::new(BinanceClient::new(creds.api_key, creds.api_secret))
            }
            Err(e) => {
                error!(error = %e, "fatal: could not resolve venue credentials");
                std::process::exit(1);
            }
        }
    };

    let trader = Trader::new(venue, market, paths, config, health);
    trader.seed_from_journal().await;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, trader stopping");
        stop_signal.store(true, Ordering::Relaxed);
    });

    info!(paper = cli.paper, "trader starting");
    trader.run(stop).await;
}
