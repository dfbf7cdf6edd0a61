use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Immutable executed-order record, appended to the trade history journal.
/// `tag` is a free-form reason string: `entry`, `dca_stage_N`, `neural_L`,
/// or `trailing_exit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub tag: String,
    pub symbol: String,
    pub qty: Decimal,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees_usd: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Trade {
    pub fn quote_value(&self) -> Decimal {
        self.qty * self.price
    }
}
