//! The two abstract collaborators the three loops depend on: a read-only
//! market data source and a trading venue. Both are small capability
//! interfaces with concrete implementations (live Binance.US client,
//! in-memory paper venue) - the paper venue depends only on the
//! market-data capability, which is the essential variability axis.

pub mod binance;
pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{Candle, Timeframe, Trade};

pub use binance::BinanceClient;
pub use paper::PaperVenue;

/// Read-only candle and price access.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_at: Option<i64>,
        end_at: Option<i64>,
    ) -> anyhow::Result<Vec<Candle>>;

    /// Zero on failure, matching the tolerant-read contract.
    async fn get_current_price(&self, symbol: &str) -> f64;

    /// Walks backwards in batches of 1500 until exhausted or `max_candles`
    /// collected, then sorts ascending and deduplicates by timestamp.
    async fn get_all_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_candles: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        const BATCH: u32 = 1500;
        let mut all = Vec::new();
        let mut end_at: Option<i64> = None;

        loop {
            let batch = self
                .get_klines(symbol, timeframe, BATCH, None, end_at)
                .await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            let earliest = batch.iter().map(|c| c.open_time).min().unwrap_or(0);
            all.extend(batch);

            if batch_len < BATCH as usize || all.len() >= max_candles {
                break;
            }
            end_at = Some(earliest - 1);
        }

        all.sort_by_key(|c| c.open_time);
        all.dedup_by_key(|c| c.open_time);
        if all.len() > max_candles {
            let drop = all.len() - max_candles;
            all.drain(0..drop);
        }
        Ok(all)
    }
}

/// Balances, market order placement, and lot-size rounding. Both buy and
/// sell sides round quantity down to the symbol's step size using decimal
/// arithmetic and reject results below `minQty`; they poll to a terminal
/// state within 30 s.
#[async_trait]
pub trait TradingVenue: Send + Sync {
    async fn get_account_balance(&self) -> anyhow::Result<HashMap<String, Decimal>>;

    /// Excludes stablecoins.
    async fn get_holdings(&self) -> anyhow::Result<HashMap<String, Decimal>>;

    async fn market_buy(&self, coin: &str, quote_amount: Decimal) -> anyhow::Result<Option<Trade>>;

    async fn market_sell(&self, coin: &str, quantity: Decimal) -> anyhow::Result<Option<Trade>>;

    async fn get_current_prices(&self, coins: &[String]) -> anyhow::Result<HashMap<String, Decimal>>;
}

/// Lot-size rounding shared by live and paper venues: round down to
/// `step_size`, reject (return `None`) if the result is zero or below
/// `min_qty`.
pub fn round_lot(quantity: Decimal, step_size: Decimal, min_qty: Decimal) -> Option<Decimal> {
    if step_size.is_zero() {
        return if quantity >= min_qty && !quantity.is_zero() {
            Some(quantity)
        } else {
            None
        };
    }
    let steps = (quantity / step_size).trunc();
    let rounded = steps * step_size;
    if rounded.is_zero() || rounded < min_qty {
        None
    } else {
        Some(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_lot_rounds_down_to_step_size() {
        let r = round_lot(dec!(1.23456), dec!(0.001), dec!(0.001)).unwrap();
        assert_eq!(r, dec!(1.234));
    }

    #[test]
    fn round_lot_rejects_below_min_qty() {
        assert!(round_lot(dec!(0.0001), dec!(0.001), dec!(0.001)).is_none());
    }

    #[test]
    fn round_lot_rejects_zero_result() {
        assert!(round_lot(dec!(0.0), dec!(0.001), dec!(0.001)).is_none());
    }
}
