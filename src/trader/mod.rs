//! Trader loop: reconciles exchange-reported holdings against tracked
//! positions, runs the exit/trailing/DCA state machine per position,
//! scans for new entries, and publishes `trader_status.json`.

mod journal;
mod status;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use status::{PositionSnapshot, TraderStatus};

use crate::config::{ConfigHandle, TradingConfig, MIN_ENTRY_USD};
use crate::dca::{calculate_dca_amount, should_dca, DcaConfig, DcaRateLimiter};
use crate::exchange::{MarketDataSource, TradingVenue};
use crate::health::HealthMonitor;
use crate::paths::{atomic_write, ProjectPaths};
use crate::trailing::{should_exit, update_trailing, TrailingConfig};
use crate::types::Position;

const TICK_INTERVAL: Duration = Duration::from_millis(500);
const POST_FILL_PAUSE: Duration = Duration::from_secs(5);

/// `should_enter = long_level >= trade_start_level AND short_level == 0`.
fn should_enter(long_level: u8, short_level: u8, trade_start_level: u8) -> bool {
    long_level >= trade_start_level && short_level == 0
}

pub struct Trader {
    venue: Arc<dyn TradingVenue>,
    market: Arc<dyn MarketDataSource>,
    paths: ProjectPaths,
    config: Arc<ConfigHandle>,
    health: Arc<HealthMonitor>,
    positions: RwLock<HashMap<String, Position>>,
    dca_limiters: RwLock<HashMap<String, DcaRateLimiter>>,
}

impl Trader {
    pub fn new(
        venue: Arc<dyn TradingVenue>,
        market: Arc<dyn MarketDataSource>,
        paths: ProjectPaths,
        config: Arc<ConfigHandle>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            venue,
            market,
            paths,
            config,
            health,
            positions: RwLock::new(HashMap::new()),
            dca_limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds the DCA rate limiter for every tracked coin from the trade
    /// journal on restart.
    pub async fn seed_from_journal(&self) {
        let history_path = self.paths.trade_history_file();
        let coins = self.config.current().await.coins;
        let mut limiters = self.dca_limiters.write().await;
        for coin in coins {
            let history = journal::dca_history_for(&history_path, &coin);
            limiters.insert(coin, DcaRateLimiter::seed_from_history(history));
        }
    }

    pub async fn run(&self, stop: Arc<AtomicBool>) {
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("trader stop requested, exiting loop");
                return;
            }

            match self.tick().await {
                Ok(()) => self.health.record_success().await,
                Err(e) => {
                    warn!(error = %e, "trader tick failed");
                    self.health.record_error().await;
                }
            }

            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        self.config.reload_if_changed().await;
        let config = self.config.current().await;

        let prices = self.fetch_prices(&config.coins).await;
        if prices.is_empty() {
            return Ok(());
        }

        self.reconcile(&prices).await?;

        let account_value = self.account_value(&prices).await?;

        let held_coins: Vec<String> = self.positions.read().await.keys().cloned().collect();
        for coin in held_coins {
            let Some(&price) = prices.get(&coin) else { continue };
            self.manage_position(&coin, price, &config).await?;
        }

        self.scan_entries(&config, &prices, account_value).await?;

        self.write_status(account_value, &prices).await?;
        Ok(())
    }

    async fn fetch_prices(&self, coins: &[String]) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for coin in coins {
            let symbol = format!("{}USDT", coin.to_uppercase());
            let price = self.market.get_current_price(&symbol).await;
            if price > 0.0 {
                if let Ok(d) = Decimal::from_str(&price.to_string()) {
                    prices.insert(coin.clone(), d);
                }
            }
        }
        prices
    }

    /// Adopts untracked holdings as new positions (cost basis falls back
    /// to `qty * current_price`); drops positions for coins no longer
    /// held.
    async fn reconcile(&self, prices: &HashMap<String, Decimal>) -> anyhow::Result<()> {
        let holdings = self.venue.get_holdings().await?;
        let mut positions = self.positions.write().await;

        for (coin, qty) in &holdings {
            if qty.is_zero() || positions.contains_key(coin) {
                continue;
            }
            let Some(&price) = prices.get(coin) else { continue };
            info!(coin, %qty, %price, "adopting externally-originated holding as a new position");
            positions.insert(coin.clone(), Position::new(coin.clone(), *qty, *qty * price));
        }

        let to_drop: Vec<String> = positions
            .keys()
            .filter(|coin| !holdings.get(*coin).is_some_and(|q| !q.is_zero()))
            .cloned()
            .collect();
        for coin in to_drop {
            info!(coin, "position no longer held at venue, dropping");
            positions.remove(&coin);
        }

        Ok(())
    }

    async fn account_value(&self, prices: &HashMap<String, Decimal>) -> anyhow::Result<Decimal> {
        let balances = self.venue.get_account_balance().await?;
        let quote = balances.get("USDT").copied().unwrap_or(Decimal::ZERO);
        let positions = self.positions.read().await;
        let held_value: Decimal = positions
            .values()
            .filter_map(|p| prices.get(&p.coin).map(|price| p.market_value(*price)))
            .sum();
        Ok(quote + held_value)
    }

    /// Per-coin state machine in strict order: exit-check, trailing-update,
    /// DCA-check.
    async fn manage_position(&self, coin: &str, price: Decimal, config: &TradingConfig) -> anyhow::Result<()> {
        let (long_level, _short_level) = self.read_signal_levels(coin);
        let trailing_cfg = TrailingConfig {
            pm_start_pct_no_dca: config.pm_start_pct_no_dca,
            pm_start_pct_with_dca: config.pm_start_pct_with_dca,
            trailing_gap_pct: config.trailing_gap_pct,
        };

        let exit_now = {
            let positions = self.positions.read().await;
            match positions.get(coin) {
                Some(p) => should_exit(p, price),
                None => return Ok(()),
            }
        };

        if exit_now {
            self.execute_exit(coin, price).await?;
            return Ok(());
        }

        {
            let mut positions = self.positions.write().await;
            if let Some(p) = positions.get_mut(coin) {
                update_trailing(p, price, &trailing_cfg);
            }
        }

        let dca_decision = {
            let positions = self.positions.read().await;
            let limiters = self.dca_limiters.read().await;
            match positions.get(coin) {
                Some(p) => {
                    let dca_cfg = DcaConfig {
                        dca_levels: config.dca_levels.clone(),
                        max_dca_buys_per_24h: config.max_dca_buys_per_24h,
                        dca_multiplier: config.dca_multiplier,
                    };
                    let limiter = limiters.get(coin).cloned().unwrap_or_default();
                    let decision = should_dca(p, price, long_level, &dca_cfg, &limiter, Utc::now());
                    decision.0.then(|| (decision.1, calculate_dca_amount(p, price, config.dca_multiplier)))
                }
                None => None,
            }
        };

        if let Some((reason, amount)) = dca_decision {
            self.execute_dca(coin, price, amount, reason).await?;
        }

        Ok(())
    }

    async fn execute_exit(&self, coin: &str, price: Decimal) -> anyhow::Result<()> {
        let quantity = {
            let positions = self.positions.read().await;
            match positions.get(coin) {
                Some(p) => p.quantity,
                None => return Ok(()),
            }
        };

        let Some(trade) = self.venue.market_sell(coin, quantity).await? else {
            warn!(coin, "trailing exit sell failed to fill");
            return Ok(());
        };

        let pnl_pct = {
            let positions = self.positions.read().await;
            positions.get(coin).map(|p| p.pnl_pct(trade.price))
        };

        let mut trade = trade;
        trade.tag = "trailing_exit".to_string();
        trade.pnl_pct = pnl_pct;
        journal::append_trade(&self.paths.trade_history_file(), &trade)?;

        self.positions.write().await.remove(coin);
        self.dca_limiters.write().await.entry(coin.to_string()).or_default().record_sell(trade.timestamp);

        info!(coin, %price, pnl_pct = ?pnl_pct, "trailing exit filled");
        tokio::time::sleep(POST_FILL_PAUSE).await;
        Ok(())
    }

    async fn execute_dca(&self, coin: &str, _price: Decimal, amount: Decimal, reason: String) -> anyhow::Result<()> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let Some(trade) = self.venue.market_buy(coin, amount).await? else {
            warn!(coin, "dca buy failed to fill");
            return Ok(());
        };

        {
            let mut positions = self.positions.write().await;
            if let Some(p) = positions.get_mut(coin) {
                p.apply_buy_fill(trade.qty, trade.price, false, trade.timestamp);
            }
        }
        self.dca_limiters.write().await.entry(coin.to_string()).or_default().record_buy(trade.timestamp);

        let mut trade = trade;
        trade.tag = reason;
        journal::append_trade(&self.paths.trade_history_file(), &trade)?;

        info!(coin, %amount, "dca buy filled");
        tokio::time::sleep(POST_FILL_PAUSE).await;
        Ok(())
    }

    /// Entry scan over tracked coins with no open position.
    async fn scan_entries(&self, config: &TradingConfig, prices: &HashMap<String, Decimal>, account_value: Decimal) -> anyhow::Result<()> {
        let held: Vec<String> = self.positions.read().await.keys().cloned().collect();
        for coin in &config.coins {
            if held.contains(coin) {
                continue;
            }
            let Some(&price) = prices.get(coin) else { continue };
            let (long_level, short_level) = self.read_signal_levels(coin);
            if !should_enter(long_level, short_level, config.trade_start_level) {
                continue;
            }

            let entry_size = (account_value * config.start_allocation_pct).max(MIN_ENTRY_USD);
            if entry_size <= Decimal::ZERO {
                continue;
            }

            let Some(trade) = self.venue.market_buy(coin, entry_size).await? else {
                warn!(coin, "entry buy failed to fill");
                continue;
            };

            let mut trade = trade;
            trade.tag = "entry".to_string();
            journal::append_trade(&self.paths.trade_history_file(), &trade)?;

            self.positions
                .write()
                .await
                .insert(coin.clone(), Position::new(coin.clone(), trade.qty, trade.quote_value()));

            info!(coin, %price, %entry_size, "entry filled");
            tokio::time::sleep(POST_FILL_PAUSE).await;
        }
        Ok(())
    }

    /// Tolerant read of the thinker's signal files: a missing or
    /// unparseable file is "no signal yet" - the thinker never deletes
    /// signal files - so this returns `(0, 0)` rather than erroring.
    fn read_signal_levels(&self, coin: &str) -> (u8, u8) {
        let long = std::fs::read_to_string(self.paths.long_dca_signal_file(coin))
            .ok()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .unwrap_or(0);
        let short = std::fs::read_to_string(self.paths.short_dca_signal_file(coin))
            .ok()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .unwrap_or(0);
        (long, short)
    }

    async fn write_status(&self, account_value: Decimal, prices: &HashMap<String, Decimal>) -> anyhow::Result<()> {
        let positions = self.positions.read().await;
        let snapshots: Vec<PositionSnapshot> = positions
            .values()
            .map(|p| {
                let price = prices.get(&p.coin).copied().unwrap_or(p.avg_price());
                PositionSnapshot::from_position(p, price)
            })
            .collect();
        drop(positions);

        let status = TraderStatus {
            account_value,
            positions: snapshots,
            tracked_coins: self.config.current().await.coins,
            health: self.health.state().await,
            timestamp: Utc::now(),
        };

        if let Ok(text) = serde_json::to_string(&status) {
            atomic_write(&self.paths.trader_status_file(), &text)?;
        }
        journal::append_account_value(&self.paths.account_value_history_file(), account_value, status.timestamp)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    #[test]
    fn should_enter_requires_long_level_past_threshold_and_no_short_level() {
        // trade_start_level=3. long=5,short=0 -> enter; long=5,short=1 ->
        // no; long=2,short=0 -> no.
        assert!(should_enter(5, 0, 3));
        assert!(!should_enter(5, 1, 3));
        assert!(!should_enter(2, 0, 3));
    }

    proptest::proptest! {
        /// `should_enter` is exactly the conjunction it's defined as, for
        /// any level/threshold combination.
        #[test]
        fn should_enter_matches_its_definition(
            long_level in 0u8..=7,
            short_level in 0u8..=7,
            trade_start_level in 1u8..=7,
        ) {
            let expected = long_level >= trade_start_level && short_level == 0;
            prop_assert_eq!(should_enter(long_level, short_level, trade_start_level), expected);
        }
    }

    struct FixedMarket(f64);

    #[async_trait]
    impl MarketDataSource for FixedMarket {
        async fn get_klines(
            &self,
            _symbol: &str,
            _tf: crate::types::Timeframe,
            _limit: u32,
            _start_at: Option<i64>,
            _end_at: Option<i64>,
        ) -> anyhow::Result<Vec<crate::types::Candle>> {
            Ok(Vec::new())
        }
        async fn get_current_price(&self, _symbol: &str) -> f64 {
            self.0
        }
    }

    #[tokio::test]
    async fn reconciliation_adopts_external_holding() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let market: Arc<dyn MarketDataSource> = Arc::new(FixedMarket(50_000.0));
        let venue = Arc::new(crate::exchange::paper::PaperVenue::new(market.clone(), dec!(1000)));
        venue.market_buy("BTC", dec!(1000)).await.unwrap();

        let config = Arc::new(ConfigHandle::new(paths.settings_file()));
        let trader = Trader::new(venue, market, paths, config, Arc::new(HealthMonitor::new()));

        let mut prices = HashMap::new();
        prices.insert("BTC".to_string(), dec!(50000));
        trader.reconcile(&prices).await.unwrap();

        let positions = trader.positions.read().await;
        assert!(positions.contains_key("BTC"));
        assert_eq!(positions.get("BTC").unwrap().avg_price(), dec!(50000));
    }

    #[tokio::test]
    async fn reconciliation_drops_position_no_longer_held() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let market: Arc<dyn MarketDataSource> = Arc::new(FixedMarket(100.0));
        let venue = Arc::new(crate::exchange::paper::PaperVenue::new(market.clone(), dec!(1000)));
        let config = Arc::new(ConfigHandle::new(paths.settings_file()));
        let trader = Trader::new(venue, market, paths, config, Arc::new(HealthMonitor::new()));

        trader.positions.write().await.insert("ETH".to_string(), Position::new("ETH", dec!(1), dec!(100)));
        let prices = HashMap::new();
        trader.reconcile(&prices).await.unwrap();

        assert!(!trader.positions.read().await.contains_key("ETH"));
    }
}
