use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trailing profit-margin state threaded through `update_trailing` /
/// `should_exit`. `was_above` always reflects the *previous* tick's
/// crossover test, never the current one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    pub active: bool,
    pub peak: Decimal,
    pub line: Decimal,
    pub was_above: bool,
}

impl TrailingState {
    pub fn reset() -> Self {
        Self::default()
    }
}

/// A held position in one coin. Created on first buy fill, mutated by
/// DCA fills, destroyed on full exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub coin: String,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub dca_count: u32,
    pub dca_buy_timestamps: Vec<DateTime<Utc>>,
    pub trailing: TrailingState,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn new(coin: impl Into<String>, quantity: Decimal, cost_basis: Decimal) -> Self {
        Self {
            coin: coin.into(),
            quantity,
            cost_basis,
            dca_count: 0,
            dca_buy_timestamps: Vec::new(),
            trailing: TrailingState::reset(),
            opened_at: Utc::now(),
        }
    }

    /// `avg_price = cost_basis / quantity`; zero quantity yields zero
    /// rather than dividing by zero, matching the tolerant-read posture
    /// used throughout the pipeline.
    pub fn avg_price(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.cost_basis / self.quantity
        }
    }

    pub fn pnl_pct(&self, current_price: Decimal) -> f64 {
        let avg = self.avg_price();
        if avg.is_zero() {
            return 0.0;
        }
        let pnl = (current_price - avg) / avg * Decimal::from(100);
        pnl.to_string().parse::<f64>().unwrap_or(0.0)
    }

    pub fn market_value(&self, current_price: Decimal) -> Decimal {
        self.quantity * current_price
    }

    /// Applies a DCA (or entry) fill: grows quantity/cost_basis, bumps
    /// `dca_count` for follow-on buys, and resets trailing state on every
    /// buy.
    pub fn apply_buy_fill(&mut self, qty: Decimal, price: Decimal, is_entry: bool, now: DateTime<Utc>) {
        self.quantity += qty;
        self.cost_basis += qty * price;
        if !is_entry {
            self.dca_count += 1;
            self.dca_buy_timestamps.push(now);
        }
        self.trailing = TrailingState::reset();
    }

    pub fn is_valid(&self) -> bool {
        self.quantity >= Decimal::ZERO
            && (!self.trailing.active || self.trailing.line <= self.trailing.peak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn avg_price_divides_cost_by_quantity() {
        let p = Position::new("BTC", dec!(0.5), dec!(50));
        assert_eq!(p.avg_price(), dec!(100));
    }

    #[test]
    fn avg_price_zero_quantity_is_zero() {
        let p = Position::new("BTC", Decimal::ZERO, Decimal::ZERO);
        assert_eq!(p.avg_price(), Decimal::ZERO);
    }

    #[test]
    fn buy_fill_resets_trailing_and_bumps_dca_count() {
        let mut p = Position::new("BTC", dec!(0.5), dec!(50));
        p.trailing = TrailingState {
            active: true,
            peak: dec!(110),
            line: dec!(105),
            was_above: true,
        };
        p.apply_buy_fill(dec!(0.1), dec!(90), false, Utc::now());
        assert_eq!(p.dca_count, 1);
        assert!(!p.trailing.active);
        assert_eq!(p.quantity, dec!(0.6));
    }
}
