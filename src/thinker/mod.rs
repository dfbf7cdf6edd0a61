//! Thinker loop: drives the signal engine per coin on a ~150ms cadence,
//! hot-reloads the coin list from the settings file, and publishes the
//! four signal files the trader consumes plus the GUI's bound/price
//! files.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::ConfigHandle;
use crate::exchange::MarketDataSource;
use crate::health::HealthMonitor;
use crate::paths::{atomic_write, ProjectPaths};
use crate::signal::generate_signal;
use crate::types::{Signal, Timeframe};

/// Memory older than this is treated as untrained.
const TRAINING_FRESHNESS_SECS: i64 = 14 * 24 * 60 * 60;
const TICK_INTERVAL: Duration = Duration::from_millis(150);

pub struct Thinker {
    market: Arc<dyn MarketDataSource>,
    paths: ProjectPaths,
    config: Arc<ConfigHandle>,
    health: Arc<HealthMonitor>,
}

impl Thinker {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        paths: ProjectPaths,
        config: Arc<ConfigHandle>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self { market, paths, config, health }
    }

    /// Runs forever until `stop` is set, checked at the top of each loop.
    pub async fn run(&self, stop: Arc<AtomicBool>) {
        let mut tracked_coins: Vec<String> = Vec::new();

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("thinker stop requested, exiting loop");
                return;
            }

            if self.config.reload_if_changed().await {
                let new_coins = self.config.current().await.coins;
                self.reconcile_coin_folders(&tracked_coins, &new_coins);
                tracked_coins = new_coins;
                info!(coins = ?tracked_coins, "coin list refreshed from settings file");
            } else if tracked_coins.is_empty() {
                tracked_coins = self.config.current().await.coins;
            }

            for coin in &tracked_coins {
                if let Err(e) = self.tick_coin(coin).await {
                    warn!(coin, error = %e, "thinker tick failed for coin, continuing");
                    self.health.record_error().await;
                } else {
                    self.health.record_success().await;
                }
            }

            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }

    /// New coins get their subfolder created; dropped coins are simply no
    /// longer iterated.
    fn reconcile_coin_folders(&self, old: &[String], new: &[String]) {
        for coin in new {
            if !old.contains(coin) {
                let _ = std::fs::create_dir_all(self.paths.coin_dir(coin));
                info!(coin, "discovered new coin, created folder");
            }
        }
        for coin in old {
            if !new.contains(coin) {
                info!(coin, "coin removed from settings, no longer tracked");
            }
        }
    }

    async fn tick_coin(&self, coin: &str) -> anyhow::Result<()> {
        // Freshness gate: untrained coins emit a flat signal and the
        // thinker moves on without touching bound/price files.
        if self.is_stale(coin) {
            self.write_flat_signal(coin)?;
            return Ok(());
        }

        let memories = self.load_memories(coin);

        let symbol = format!("{}USDT", coin.to_uppercase());
        let current_price = self.market.get_current_price(&symbol).await;
        let candles = self
            .market
            .get_klines(&symbol, Timeframe::H1, 2, None, None)
            .await
            .unwrap_or_default();

        if current_price <= 0.0 || candles.len() < 2 {
            return Ok(());
        }

        let last = candles.last().unwrap();
        let open: f64 = last.open.to_string().parse().unwrap_or(0.0);
        let close: f64 = last.close.to_string().parse().unwrap_or(0.0);

        let signal = generate_signal(coin, current_price, open, close, &memories);
        self.write_signal(coin, &signal, current_price)?;
        Ok(())
    }

    fn is_stale(&self, coin: &str) -> bool {
        let text = std::fs::read_to_string(self.paths.last_training_time_file(coin));
        match text {
            Ok(t) => match t.trim().parse::<i64>() {
                Ok(ts) => Utc::now().timestamp() - ts > TRAINING_FRESHNESS_SECS,
                Err(_) => true,
            },
            Err(_) => true,
        }
    }

    fn load_memories(&self, coin: &str) -> HashMap<Timeframe, crate::memory::PatternMemory> {
        let mut memories = HashMap::new();
        for tf in Timeframe::ALL {
            let memory = crate::memory::load(&self.paths, coin, tf);
            if !memory.is_empty() {
                memories.insert(tf, memory);
            }
        }
        memories
    }

    fn write_flat_signal(&self, coin: &str) -> anyhow::Result<()> {
        atomic_write(&self.paths.long_dca_signal_file(coin), "0")?;
        atomic_write(&self.paths.short_dca_signal_file(coin), "0")?;
        atomic_write(&self.paths.long_profit_margin_file(coin), "0")?;
        atomic_write(&self.paths.short_profit_margin_file(coin), "0")?;
        Ok(())
    }

    fn write_signal(&self, coin: &str, signal: &Signal, current_price: f64) -> anyhow::Result<()> {
        atomic_write(&self.paths.long_dca_signal_file(coin), &signal.long_level.to_string())?;
        atomic_write(&self.paths.short_dca_signal_file(coin), &signal.short_level.to_string())?;
        atomic_write(&self.paths.long_profit_margin_file(coin), &signal.long_profit_margin.to_string())?;
        atomic_write(&self.paths.short_profit_margin_file(coin), &signal.short_profit_margin.to_string())?;

        if signal.bounds_valid() && !signal.low_bounds.is_empty() {
            atomic_write(&self.paths.low_bound_prices_file(coin), &space_separated(&signal.long_bounds))?;
            atomic_write(&self.paths.high_bound_prices_file(coin), &space_separated(&signal.short_bounds))?;
        }
        atomic_write(&self.paths.current_price_file(coin), &current_price.to_string())?;
        Ok(())
    }
}

fn space_separated(values: &[f64]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}
