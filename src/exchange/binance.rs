//! Live Binance.US implementation of [`MarketDataSource`] and
//! [`TradingVenue`]. HMAC-SHA256 query signing, paginated historical
//! candle fetch, decimal lot-size rounding, and terminal-state polling on
//! market orders all follow the same shapes as a conventional Binance.US
//! REST client.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use nonzero_ext::nonzero;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::exchange::{round_lot, MarketDataSource, TradingVenue};
use crate::types::{Candle, Timeframe, Trade, TradeSide};

const BINANCE_US_API: &str = "https://api.binance.us";
const STABLECOINS: &[&str] = &["USDT", "USD", "USDC", "BUSD"];

type HmacSha256 = Hmac<Sha256>;
type StdRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone, Copy)]
struct SymbolFilters {
    step_size: Decimal,
    min_qty: Decimal,
}

pub struct BinanceClient {
    client: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    venue_limiter: Arc<StdRateLimiter>,
    market_limiter: Arc<StdRateLimiter>,
    filters_cache: RwLock<HashMap<String, SymbolFilters>>,
}

impl BinanceClient {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            secret_key,
            base_url: BINANCE_US_API.to_string(),
            venue_limiter: Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(5u32)))),
            market_limiter: Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(2u32)))),
            filters_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn public_only() -> Self {
        Self::new(String::new(), String::new())
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn build_signed_query(&self, params: &HashMap<&str, String>) -> String {
        let timestamp = Utc::now().timestamp_millis();
        let mut query_parts: Vec<String> =
            params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query_parts.push(format!("timestamp={}", timestamp));
        query_parts.push("recvWindow=5000".to_string());
        let query = query_parts.join("&");
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    fn symbol(coin: &str) -> String {
        format!("{}USDT", coin.to_uppercase())
    }

    async fn symbol_filters(&self, symbol: &str) -> anyhow::Result<SymbolFilters> {
        if let Some(f) = self.filters_cache.read().await.get(symbol) {
            return Ok(*f);
        }

        self.market_limiter.until_ready().await;
        let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.base_url, symbol);
        let resp: ExchangeInfoResponse = self.client.get(&url).send().await?.json().await?;
        let info = resp
            .symbols
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!(PipelineError::MarketDataFailure(format!(
                "no exchangeInfo for {}",
                symbol
            ))))?;

        let mut step_size = Decimal::new(1, 8);
        let mut min_qty = Decimal::ZERO;
        for f in info.filters {
            if f.filter_type == "LOT_SIZE" {
                if let Some(s) = f.step_size.as_deref() {
                    step_size = Decimal::from_str(s).unwrap_or(step_size);
                }
                if let Some(m) = f.min_qty.as_deref() {
                    min_qty = Decimal::from_str(m).unwrap_or(min_qty);
                }
            }
        }

        let filters = SymbolFilters { step_size, min_qty };
        self.filters_cache
            .write()
            .await
            .insert(symbol.to_string(), filters);
        Ok(filters)
    }

    /// Retries a transient fetch with exponential backoff: base 3.5s,
    /// factor 2, cap 30s, 3 attempts.
    async fn with_retry<T, F, Fut>(&self, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut delay = Duration::from_millis(3500);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= 3 => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(30));
                }
            }
        }
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: Decimal,
    ) -> anyhow::Result<OrderResponse> {
        self.venue_limiter.until_ready().await;

        let url = format!("{}/api/v3/order", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("side", side.to_string());
        params.insert("type", "MARKET".to_string());
        params.insert("quantity", quantity.to_string());

        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);

        debug!(symbol, side, %quantity, "placing market order");

        let resp = self
            .client
            .post(&full_url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(PipelineError::VenueOrderFailure(error_text)));
        }

        let mut order: OrderResponse = resp.json().await?;

        // Poll to a terminal state for up to 30s.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while !is_terminal(&order.status) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(500)).await;
            order = self.query_order(symbol, order.order_id).await?;
        }

        Ok(order)
    }

    async fn query_order(&self, symbol: &str, order_id: u64) -> anyhow::Result<OrderResponse> {
        self.venue_limiter.until_ready().await;
        let url = format!("{}/api/v3/order", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());
        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);

        let resp: OrderResponse = self
            .client
            .get(&full_url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?
            .json()
            .await?;
        Ok(resp)
    }

    fn fill_price(order: &OrderResponse) -> Decimal {
        let executed_qty = Decimal::from_str(&order.executed_qty).unwrap_or(Decimal::ZERO);
        if let Some(fills) = &order.fills {
            if !fills.is_empty() {
                let mut weighted_sum = Decimal::ZERO;
                let mut total_qty = Decimal::ZERO;
                for fill in fills {
                    let price = Decimal::from_str(&fill.price).unwrap_or(Decimal::ZERO);
                    let qty = Decimal::from_str(&fill.qty).unwrap_or(Decimal::ZERO);
                    weighted_sum += price * qty;
                    total_qty += qty;
                }
                if !total_qty.is_zero() {
                    return weighted_sum / total_qty;
                }
            }
        }
        if let Some(quote_qty) = order
            .cummulative_quote_qty
            .as_deref()
            .and_then(|q| Decimal::from_str(q).ok())
        {
            if !executed_qty.is_zero() {
                return quote_qty / executed_qty;
            }
        }
        order
            .avg_price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok())
            .unwrap_or(Decimal::ZERO)
    }
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "FILLED" | "CANCELED" | "REJECTED" | "EXPIRED")
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_at: Option<i64>,
        end_at: Option<i64>,
    ) -> anyhow::Result<Vec<Candle>> {
        self.with_retry(|| async {
            self.market_limiter.until_ready().await;
            let mut url = format!(
                "{}/api/v3/klines?symbol={}&interval={}&limit={}",
                self.base_url,
                symbol,
                timeframe.as_str(),
                limit
            );
            if let Some(s) = start_at {
                url.push_str(&format!("&startTime={}", s * 1000));
            }
            if let Some(e) = end_at {
                url.push_str(&format!("&endTime={}", e * 1000));
            }

            let resp: Vec<Vec<serde_json::Value>> = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!(PipelineError::MarketDataFailure(e.to_string())))?
                .json()
                .await
                .map_err(|e| anyhow::anyhow!(PipelineError::MarketDataFailure(e.to_string())))?;

            resp.into_iter()
                .map(|k| parse_kline(&k))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await
    }

    async fn get_current_price(&self, symbol: &str) -> f64 {
        self.market_limiter.until_ready().await;
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let result: anyhow::Result<PriceResponse> = async {
            Ok(self.client.get(&url).send().await?.json().await?)
        }
        .await;
        match result {
            Ok(p) => p.price.parse().unwrap_or(0.0),
            Err(e) => {
                warn!(symbol, error = %e, "get_current_price failed, returning 0");
                0.0
            }
        }
    }
}

#[async_trait]
impl TradingVenue for BinanceClient {
    async fn get_account_balance(&self) -> anyhow::Result<HashMap<String, Decimal>> {
        self.venue_limiter.until_ready().await;
        let url = format!("{}/api/v3/account", self.base_url);
        let params: HashMap<&str, String> = HashMap::new();
        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);

        let resp = self
            .client
            .get(&full_url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(PipelineError::VenueAuthFailure));
        }
        let account: AccountResponse = resp.json().await?;

        Ok(account
            .balances
            .into_iter()
            .filter_map(|b| {
                let free = Decimal::from_str(&b.free).ok()?;
                let locked = Decimal::from_str(&b.locked).ok()?;
                Some((b.asset, free + locked))
            })
            .collect())
    }

    async fn get_holdings(&self) -> anyhow::Result<HashMap<String, Decimal>> {
        let balances = self.get_account_balance().await?;
        Ok(balances
            .into_iter()
            .filter(|(asset, qty)| !STABLECOINS.contains(&asset.as_str()) && !qty.is_zero())
            .collect())
    }

    async fn market_buy(&self, coin: &str, quote_amount: Decimal) -> anyhow::Result<Option<Trade>> {
        let symbol = Self::symbol(coin);
        let price = self.get_current_price(&symbol).await;
        if price <= 0.0 {
            return Ok(None);
        }
        let ask_price = Decimal::from_str(&price.to_string()).unwrap_or(Decimal::ZERO);
        let raw_qty = quote_amount / ask_price;

        let filters = self.symbol_filters(&symbol).await?;
        let Some(qty) = round_lot(raw_qty, filters.step_size, filters.min_qty) else {
            return Ok(None);
        };

        let order = self.place_market_order(&symbol, "BUY", qty).await?;
        if !is_terminal(&order.status) || order.status != "FILLED" {
            return Ok(None);
        }

        Ok(Some(Trade {
            timestamp: Utc::now(),
            side: TradeSide::Buy,
            tag: String::new(),
            symbol: coin.to_string(),
            qty: Decimal::from_str(&order.executed_qty).unwrap_or(qty),
            price: Self::fill_price(&order),
            pnl_pct: None,
            fees_usd: None,
            order_id: Some(order.order_id.to_string()),
        }))
    }

    async fn market_sell(&self, coin: &str, quantity: Decimal) -> anyhow::Result<Option<Trade>> {
        let symbol = Self::symbol(coin);
        let filters = self.symbol_filters(&symbol).await?;
        let Some(qty) = round_lot(quantity, filters.step_size, filters.min_qty) else {
            return Ok(None);
        };

        let order = self.place_market_order(&symbol, "SELL", qty).await?;
        if !is_terminal(&order.status) || order.status != "FILLED" {
            return Ok(None);
        }

        Ok(Some(Trade {
            timestamp: Utc::now(),
            side: TradeSide::Sell,
            tag: String::new(),
            symbol: coin.to_string(),
            qty: Decimal::from_str(&order.executed_qty).unwrap_or(qty),
            price: Self::fill_price(&order),
            pnl_pct: None,
            fees_usd: None,
            order_id: Some(order.order_id.to_string()),
        }))
    }

    async fn get_current_prices(&self, coins: &[String]) -> anyhow::Result<HashMap<String, Decimal>> {
        let mut out = HashMap::new();
        for coin in coins {
            let symbol = Self::symbol(coin);
            let price = self.get_current_price(&symbol).await;
            out.insert(coin.clone(), Decimal::from_str(&price.to_string()).unwrap_or(Decimal::ZERO));
        }
        Ok(out)
    }
}

fn parse_kline(k: &[serde_json::Value]) -> anyhow::Result<Candle> {
    let open_time_ms = k.first().and_then(|v| v.as_i64()).unwrap_or(0);
    let get = |i: usize| -> Decimal {
        k.get(i)
            .and_then(|v| v.as_str())
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO)
    };
    Ok(Candle {
        open_time: open_time_ms / 1000,
        open: get(1),
        high: get(2),
        low: get(3),
        close: get(4),
        volume: get(5),
    })
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: u64,
    status: String,
    #[serde(rename = "executedQty")]
    executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty")]
    cummulative_quote_qty: Option<String>,
    #[serde(rename = "avgPrice")]
    avg_price: Option<String>,
    fills: Option<Vec<FillResponse>>,
}

#[derive(Debug, Deserialize)]
struct FillResponse {
    price: String,
    qty: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceResponse>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<ExchangeInfoSymbol>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoSymbol {
    filters: Vec<ExchangeInfoFilter>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
    #[serde(rename = "minQty")]
    min_qty: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_price_prefers_weighted_fills() {
        let order = OrderResponse {
            order_id: 1,
            status: "FILLED".to_string(),
            executed_qty: "2".to_string(),
            cummulative_quote_qty: Some("200".to_string()),
            avg_price: None,
            fills: Some(vec![
                FillResponse { price: "100".to_string(), qty: "1".to_string() },
                FillResponse { price: "102".to_string(), qty: "1".to_string() },
            ]),
        };
        assert_eq!(BinanceClient::fill_price(&order), Decimal::from_str("101").unwrap());
    }

    #[test]
    fn fill_price_falls_back_to_quote_over_qty() {
        let order = OrderResponse {
            order_id: 1,
            status: "FILLED".to_string(),
            executed_qty: "2".to_string(),
            cummulative_quote_qty: Some("204".to_string()),
            avg_price: None,
            fills: None,
        };
        assert_eq!(BinanceClient::fill_price(&order), Decimal::from_str("102").unwrap());
    }
}
