//! Trailing profit-margin engine: a ratcheting trailing stop whose exit
//! test deliberately compares against the *previous* tick's crossover
//! state, not the current one.

use rust_decimal::Decimal;

use crate::types::Position;

/// The subset of `TradingConfig` the trailing engine needs.
#[derive(Debug, Clone, Copy)]
pub struct TrailingConfig {
    pub pm_start_pct_no_dca: Decimal,
    pub pm_start_pct_with_dca: Decimal,
    pub trailing_gap_pct: Decimal,
}

/// `pm_start_line(position) = avg_price * (1 + pm_pct/100)`, using
/// `pm_start_pct_no_dca` on a fresh position and `pm_start_pct_with_dca`
/// once at least one DCA buy has landed.
pub fn pm_start_line(position: &Position, config: &TrailingConfig) -> Decimal {
    let pm_pct = if position.dca_count == 0 {
        config.pm_start_pct_no_dca
    } else {
        config.pm_start_pct_with_dca
    };
    position.avg_price() * (Decimal::ONE + pm_pct / Decimal::from(100))
}

/// Advances `position.trailing` by one tick. Must be called every tick,
/// before `should_exit`, even while inactive - it is what establishes
/// `line` before activation and what records `was_above` for the next
/// tick's crossover test.
pub fn update_trailing(position: &mut Position, price: Decimal, config: &TrailingConfig) {
    let start_line = pm_start_line(position, config);
    let trailing = &mut position.trailing;

    if !trailing.active {
        trailing.line = start_line;
        if price >= trailing.line {
            trailing.active = true;
            trailing.peak = price;
        }
    }

    if trailing.active {
        trailing.peak = trailing.peak.max(price);
        let candidate = trailing.peak * (Decimal::ONE - config.trailing_gap_pct / Decimal::from(100));
        let candidate = candidate.max(start_line);
        trailing.line = trailing.line.max(candidate);
    }

    trailing.was_above = price >= trailing.line;
}

/// `should_exit = active AND was_above (from the prior tick) AND price <
/// line`. The trader loop calls this *before* `update_trailing` each tick:
/// `trailing.was_above` and `trailing.line` here are exactly what last
/// tick's `update_trailing` left behind, so a price that just
/// ratcheted the line up on this very tick cannot immediately trip its own
/// exit - only a tick that was above the line last time and has now fallen
/// under it does.
pub fn should_exit(position: &Position, price: Decimal) -> bool {
    let trailing = &position.trailing;
    trailing.active && trailing.was_above && price < trailing.line
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> TrailingConfig {
        TrailingConfig {
            pm_start_pct_no_dca: dec!(5),
            pm_start_pct_with_dca: dec!(2),
            trailing_gap_pct: dec!(0.5),
        }
    }

    #[test]
    fn pm_start_line_uses_no_dca_pct_on_fresh_position() {
        let position = Position::new("BTC", dec!(1), dec!(100));
        let line = pm_start_line(&position, &config());
        assert_eq!(line, dec!(105));
    }

    #[test]
    fn pm_start_line_uses_with_dca_pct_after_a_dca_buy() {
        let mut position = Position::new("BTC", dec!(1), dec!(100));
        position.dca_count = 1;
        let line = pm_start_line(&position, &config());
        assert_eq!(line, dec!(102));
    }

    #[test]
    fn trailing_line_ratchets_up_and_exit_fires_after_falling_back_under_it() {
        // avg 100, qty 1, pm_start_pct_no_dca=5, trailing_gap_pct=0.5.
        let mut position = Position::new("BTC", dec!(1), dec!(100));
        let cfg = config();

        update_trailing(&mut position, dec!(105), &cfg);
        assert!(position.trailing.active);
        assert_eq!(position.trailing.peak, dec!(105));
        assert_eq!(position.trailing.line, dec!(104.475));

        update_trailing(&mut position, dec!(107), &cfg);
        assert_eq!(position.trailing.peak, dec!(107));
        assert_eq!(position.trailing.line, dec!(106.465));

        update_trailing(&mut position, dec!(107.5), &cfg);
        assert_eq!(position.trailing.peak, dec!(107.5));
        assert!(position.trailing.line > dec!(106.465));
        assert!(position.trailing.was_above);

        // Exit check runs before this tick's update_trailing: 106 has fallen
        // under the line the 107.5 tick left behind, and that tick left
        // `was_above = true`, so this trips the exit.
        assert!(should_exit(&position, dec!(106)));
    }

    #[test]
    fn trailing_line_never_decreases() {
        let mut position = Position::new("BTC", dec!(1), dec!(100));
        let cfg = config();
        update_trailing(&mut position, dec!(110), &cfg);
        let line_after_peak = position.trailing.line;
        update_trailing(&mut position, dec!(108), &cfg);
        assert!(position.trailing.line >= line_after_peak);
    }

    #[test]
    fn should_exit_false_before_activation() {
        let mut position = Position::new("BTC", dec!(1), dec!(100));
        let cfg = config();
        update_trailing(&mut position, dec!(101), &cfg);
        assert!(!should_exit(&position, dec!(90)));
    }

    proptest::proptest! {
        /// Over any price sequence, `line` never decreases once active,
        /// and never falls below `pm_start_line`.
        #[test]
        fn trailing_line_monotonic_and_never_below_start(
            prices in proptest::collection::vec(50.0f64..200.0, 1..40),
        ) {
            let mut position = Position::new("BTC", dec!(1), dec!(100));
            let cfg = config();
            let start_line = pm_start_line(&position, &cfg);
            let mut prev_line = Decimal::ZERO;

            for p in prices {
                let price = Decimal::try_from(p).unwrap();
                update_trailing(&mut position, price, &cfg);
                if position.trailing.active {
                    prop_assert!(position.trailing.line >= start_line);
                    prop_assert!(position.trailing.line >= prev_line);
                }
                prev_line = position.trailing.line;
            }
        }
    }

    #[test]
    fn buy_fill_resets_trailing_state() {
        let mut position = Position::new("BTC", dec!(1), dec!(100));
        let cfg = config();
        update_trailing(&mut position, dec!(110), &cfg);
        assert!(position.trailing.active);
        position.apply_buy_fill(dec!(0.1), dec!(90), false, chrono::Utc::now());
        assert!(!position.trailing.active);
        assert_eq!(position.trailing.peak, Decimal::ZERO);
    }
}
