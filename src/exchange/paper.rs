//! In-memory simulated venue for `trader --paper`: prices fills at the
//! live market price from an underlying [`MarketDataSource`], deducts a
//! 0.1% simulated fee, and keeps balances in memory.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

use crate::exchange::{MarketDataSource, TradingVenue};
use crate::types::{Trade, TradeSide};

/// Matches the upstream paper-trading engine's taker fee constant.
const SIMULATED_FEE_RATE: Decimal = dec!(0.001);

pub struct PaperVenue {
    market: Arc<dyn MarketDataSource>,
    balances: Mutex<HashMap<String, Decimal>>,
}

impl PaperVenue {
    pub fn new(market: Arc<dyn MarketDataSource>, starting_quote_balance: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), starting_quote_balance);
        Self {
            market,
            balances: Mutex::new(balances),
        }
    }

    async fn price_of(&self, coin: &str) -> Option<Decimal> {
        let symbol = format!("{}USDT", coin.to_uppercase());
        let price = self.market.get_current_price(&symbol).await;
        if price <= 0.0 {
            None
        } else {
            Decimal::from_str(&price.to_string()).ok()
        }
    }
}

#[async_trait]
impl TradingVenue for PaperVenue {
    async fn get_account_balance(&self) -> anyhow::Result<HashMap<String, Decimal>> {
        Ok(self.balances.lock().await.clone())
    }

    async fn get_holdings(&self) -> anyhow::Result<HashMap<String, Decimal>> {
        let balances = self.balances.lock().await;
        Ok(balances
            .iter()
            .filter(|(asset, qty)| asset.as_str() != "USDT" && !qty.is_zero())
            .map(|(a, q)| (a.clone(), *q))
            .collect())
    }

    async fn market_buy(&self, coin: &str, quote_amount: Decimal) -> anyhow::Result<Option<Trade>> {
        let Some(price) = self.price_of(coin).await else {
            return Ok(None);
        };

        let mut balances = self.balances.lock().await;
        let usdt = balances.entry("USDT".to_string()).or_insert(Decimal::ZERO);
        if *usdt < quote_amount {
            return Ok(None);
        }

        let fee = quote_amount * SIMULATED_FEE_RATE;
        let net_quote = quote_amount - fee;
        let qty = net_quote / price;

        *usdt -= quote_amount;
        let held = balances.entry(coin.to_string()).or_insert(Decimal::ZERO);
        *held += qty;

        Ok(Some(Trade {
            timestamp: Utc::now(),
            side: TradeSide::Buy,
            tag: String::new(),
            symbol: coin.to_string(),
            qty,
            price,
            pnl_pct: None,
            fees_usd: Some(fee),
            order_id: None,
        }))
    }

    async fn market_sell(&self, coin: &str, quantity: Decimal) -> anyhow::Result<Option<Trade>> {
        let Some(price) = self.price_of(coin).await else {
            return Ok(None);
        };

        let mut balances = self.balances.lock().await;
        let held = balances.entry(coin.to_string()).or_insert(Decimal::ZERO);
        let sell_qty = quantity.min(*held);
        if sell_qty.is_zero() {
            return Ok(None);
        }
        *held -= sell_qty;

        let gross_quote = sell_qty * price;
        let fee = gross_quote * SIMULATED_FEE_RATE;
        let net_quote = gross_quote - fee;

        let usdt = balances.entry("USDT".to_string()).or_insert(Decimal::ZERO);
        *usdt += net_quote;

        Ok(Some(Trade {
            timestamp: Utc::now(),
            side: TradeSide::Sell,
            tag: String::new(),
            symbol: coin.to_string(),
            qty: sell_qty,
            price,
            pnl_pct: None,
            fees_usd: Some(fee),
            order_id: None,
        }))
    }

    async fn get_current_prices(&self, coins: &[String]) -> anyhow::Result<HashMap<String, Decimal>> {
        let mut out = HashMap::new();
        for coin in coins {
            if let Some(price) = self.price_of(coin).await {
                out.insert(coin.clone(), price);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;
    use async_trait::async_trait;

    struct FixedPriceMarket(f64);

    #[async_trait]
    impl MarketDataSource for FixedPriceMarket {
        async fn get_klines(
            &self,
            _symbol: &str,
            _timeframe: crate::types::Timeframe,
            _limit: u32,
            _start_at: Option<i64>,
            _end_at: Option<i64>,
        ) -> anyhow::Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn get_current_price(&self, _symbol: &str) -> f64 {
            self.0
        }
    }

    #[tokio::test]
    async fn buy_then_sell_deducts_simulated_fee() {
        let market = Arc::new(FixedPriceMarket(100.0));
        let venue = PaperVenue::new(market, dec!(1000));

        let buy = venue.market_buy("BTC", dec!(100)).await.unwrap().unwrap();
        assert_eq!(buy.fees_usd, Some(dec!(0.1)));
        assert_eq!(buy.qty, dec!(0.999));

        let sell = venue.market_sell("BTC", buy.qty).await.unwrap().unwrap();
        assert!(sell.fees_usd.unwrap() > Decimal::ZERO);

        let balances = venue.get_account_balance().await.unwrap();
        assert_eq!(*balances.get("BTC").unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn buy_fails_when_insufficient_balance() {
        let market = Arc::new(FixedPriceMarket(100.0));
        let venue = PaperVenue::new(market, dec!(10));
        let result = venue.market_buy("BTC", dec!(100)).await.unwrap();
        assert!(result.is_none());
    }
}
