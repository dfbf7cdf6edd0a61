use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar. `open_time` is a Unix epoch in seconds, matching the
/// on-disk and wire format used throughout the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body_percentage(&self) -> Decimal {
        if self.range().is_zero() {
            return Decimal::ZERO;
        }
        (self.body_size() / self.range()) * Decimal::from(100)
    }

    pub fn range_percentage(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        (self.range() / self.open) * Decimal::from(100)
    }

    pub fn upper_shadow_percentage(&self) -> Decimal {
        let top = self.close.max(self.open);
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        ((self.high - top) / self.open) * Decimal::from(100)
    }

    pub fn lower_shadow_percentage(&self) -> Decimal {
        let bottom = self.close.min(self.open);
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        ((bottom - self.low) / self.open) * Decimal::from(100)
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// `100 * (close - open) / open`, zero when `open == 0`.
    pub fn close_pct(&self) -> f64 {
        pct_change(self.open, self.close)
    }

    /// `100 * (high - open) / open`, zero when `open == 0`.
    pub fn high_pct(&self) -> f64 {
        pct_change(self.open, self.high)
    }

    /// `100 * (low - open) / open`, zero when `open == 0`.
    pub fn low_pct(&self) -> f64 {
        pct_change(self.open, self.low)
    }

    /// Validates the OHLC invariant `low <= open, close <= high` and
    /// `volume >= 0`.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }
}

fn pct_change(open: Decimal, value: Decimal) -> f64 {
    if open.is_zero() {
        return 0.0;
    }
    let open = open.to_string().parse::<f64>().unwrap_or(0.0);
    let value = value.to_string().parse::<f64>().unwrap_or(0.0);
    if open == 0.0 {
        return 0.0;
    }
    100.0 * (value - open) / open
}

/// A rolling, size-capped buffer of recent candles, oldest first.
#[derive(Debug, Clone, Default)]
pub struct CandleBuffer {
    pub candles: Vec<Candle>,
    pub max_size: usize,
}

impl CandleBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            candles: Vec::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() >= self.max_size {
            self.candles.remove(0);
        }
        self.candles.push(candle);
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_n(&self, n: usize) -> &[Candle] {
        let len = self.candles.len();
        if n >= len {
            &self.candles[..]
        } else {
            &self.candles[len - n..]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn close_pct_zero_on_zero_open() {
        let c = Candle {
            open_time: 0,
            open: Decimal::ZERO,
            high: dec!(1),
            low: dec!(0),
            close: dec!(1),
            volume: dec!(1),
        };
        assert_eq!(c.close_pct(), 0.0);
    }

    #[test]
    fn close_pct_matches_formula() {
        let c = Candle {
            open_time: 0,
            open: dec!(100),
            high: dec!(105),
            low: dec!(95),
            close: dec!(102),
            volume: dec!(1),
        };
        assert!((c.close_pct() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn valid_ohlc_invariant() {
        let c = Candle {
            open_time: 0,
            open: dec!(100),
            high: dec!(105),
            low: dec!(95),
            close: dec!(102),
            volume: dec!(1),
        };
        assert!(c.is_valid());
    }
}
