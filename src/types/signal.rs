use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot produced by the signal engine for one coin at one
/// instant. `long_bounds`/`short_bounds`, when populated, always have
/// exactly seven entries, one per timeframe in `Timeframe::ALL` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub coin: String,
    pub long_level: u8,
    pub short_level: u8,
    pub long_bounds: Vec<f64>,
    pub short_bounds: Vec<f64>,
    pub long_profit_margin: f64,
    pub short_profit_margin: f64,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn flat(coin: impl Into<String>) -> Self {
        Self {
            coin: coin.into(),
            long_level: 0,
            short_level: 0,
            long_bounds: Vec::new(),
            short_bounds: Vec::new(),
            long_profit_margin: 0.0,
            short_profit_margin: 0.0,
            timestamp: Utc::now(),
        }
    }

    /// Bounds invariant: populated bounds are always length 7.
    pub fn bounds_valid(&self) -> bool {
        (self.long_bounds.is_empty() || self.long_bounds.len() == 7)
            && (self.short_bounds.is_empty() || self.short_bounds.len() == 7)
    }
}
