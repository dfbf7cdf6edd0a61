//! `trader_status.json` wire shape, written each tick alongside the
//! health state so an external viewer can render both without
//! re-deriving thresholds.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::health::HealthState;
use crate::types::Position;

#[derive(Debug, Serialize)]
pub struct PositionSnapshot {
    pub coin: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub pnl_pct: f64,
    pub market_value: Decimal,
    pub dca_count: u32,
    pub trailing_active: bool,
    pub trailing_line: Decimal,
}

impl PositionSnapshot {
    pub fn from_position(position: &Position, current_price: Decimal) -> Self {
        Self {
            coin: position.coin.clone(),
            quantity: position.quantity,
            avg_price: position.avg_price(),
            current_price,
            pnl_pct: position.pnl_pct(current_price),
            market_value: position.market_value(current_price),
            dca_count: position.dca_count,
            trailing_active: position.trailing.active,
            trailing_line: position.trailing.line,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TraderStatus {
    pub account_value: Decimal,
    pub positions: Vec<PositionSnapshot>,
    pub tracked_coins: Vec<String>,
    pub health: HealthState,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
