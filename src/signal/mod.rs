//! Pure, stateless signal engine: turns a trained pattern memory and the
//! current candle into a `Signal` carrying 0..7 long/short conviction
//! levels and the predicted price bands behind them.

use std::collections::HashMap;

use chrono::Utc;

use crate::memory::{find_matches, PatternMemory};
use crate::types::{Signal, Timeframe};

const SENTINEL_HIGH: f64 = 9.9999e16;
const SENTINEL_LOW: f64 = 0.01;
const BASE_GAP_PCT: f64 = 0.25;
const GAP_STEP_PCT: f64 = 0.25;
const BOUND_OFFSET: f64 = 0.005;
const NUDGE_FRACTION: f64 = 0.0005;

#[derive(Debug, Clone, Copy)]
struct TfPrediction {
    active: bool,
    predicted_high: f64,
    predicted_low: f64,
}

/// Weighted mean of `diff * weight` over matched indices with a nonzero
/// weight on this channel, the same aggregate formula the trainer's
/// `adjust_weights` uses. Returns 0.0 if no matched index has a nonzero
/// weight.
pub fn weighted_aggregate(diffs: &[f64], weights: &[f64], matches: &[usize]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &idx in matches {
        let w = weights[idx];
        if w != 0.0 {
            sum += diffs[idx] * w;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn predict_tf(memory: &PatternMemory, current_pattern: &[f64], candle_close: f64) -> TfPrediction {
    if memory.is_empty() {
        return TfPrediction {
            active: false,
            predicted_high: candle_close,
            predicted_low: candle_close,
        };
    }

    let matches = find_matches(memory, current_pattern, memory.threshold);
    if matches.is_empty() {
        return TfPrediction {
            active: false,
            predicted_high: candle_close,
            predicted_low: candle_close,
        };
    }

    let h_diff = weighted_aggregate(&memory.high_diffs, &memory.weights_high, &matches);
    let l_diff = weighted_aggregate(&memory.low_diffs, &memory.weights_low, &matches);

    TfPrediction {
        active: true,
        predicted_high: candle_close * (1.0 + h_diff),
        predicted_low: candle_close * (1.0 + l_diff),
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    tf_index: usize,
    value: f64,
    is_sentinel: bool,
}

/// Percentage distance between two bound values, using the same symmetric
/// formula as `pattern_distance`.
fn pct_distance(a: f64, b: f64) -> f64 {
    let mean = (a + b) / 2.0;
    if mean == 0.0 {
        return 0.0;
    }
    (a - b).abs() / mean.abs() * 100.0
}

/// Sorts then de-crowds one side's seven bound values. `desc` selects
/// descending order (used for the low-bound side); ascending
/// otherwise (high-bound side). Returns bound values indexed by original
/// timeframe position.
fn sort_and_decrowd(mut slots: Vec<Slot>, desc: bool) -> Vec<Slot> {
    if desc {
        slots.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap());
    } else {
        slots.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());
    }

    let mut gap_mod = 0.0;
    let mut i = 0;
    // Bound the number of nudges so a pathological input can never spin
    // forever; in practice this converges in a handful of steps.
    let mut guard = 0;
    while i + 1 < slots.len() && guard < 10_000 {
        guard += 1;
        let a = slots[i].value;
        let b = slots[i + 1].value;
        let threshold = BASE_GAP_PCT + gap_mod;
        let out_of_order = if desc { b > a } else { b < a };
        let crowded = pct_distance(a, b) < threshold;

        if (crowded || out_of_order) && !slots[i + 1].is_sentinel {
            let nudge = NUDGE_FRACTION * slots[i + 1].value;
            slots[i + 1].value += if desc { -nudge } else { nudge };
            // Re-examine the same pair without advancing; gap_mod only
            // grows per pair advanced, not per nudge.
        } else {
            gap_mod += GAP_STEP_PCT;
            i += 1;
        }
    }

    slots
}

fn bounds_by_tf_index(slots: &[Slot]) -> Vec<f64> {
    let mut out = vec![0.0; slots.len()];
    for slot in slots {
        out[slot.tf_index] = slot.value;
    }
    out
}

/// Pure, stateless core of the thinker loop. `memories_by_tf` need not
/// contain all seven timeframes; absent entries are treated as empty
/// memories (inactive, sentinel bounds).
pub fn generate_signal(
    coin: &str,
    current_price: f64,
    candle_open: f64,
    candle_close: f64,
    memories_by_tf: &HashMap<Timeframe, PatternMemory>,
) -> Signal {
    let current_pattern = if candle_open == 0.0 {
        vec![0.0]
    } else {
        vec![100.0 * (candle_close - candle_open) / candle_open]
    };

    let empty = PatternMemory::default();
    let predictions: Vec<TfPrediction> = Timeframe::ALL
        .iter()
        .map(|tf| {
            let memory = memories_by_tf.get(tf).unwrap_or(&empty);
            predict_tf(memory, &current_pattern, candle_close)
        })
        .collect();

    let high_slots: Vec<Slot> = predictions
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            if p.active {
                Slot { tf_index: idx, value: p.predicted_high * (1.0 + BOUND_OFFSET), is_sentinel: false }
            } else {
                Slot { tf_index: idx, value: SENTINEL_HIGH, is_sentinel: true }
            }
        })
        .collect();

    let low_slots: Vec<Slot> = predictions
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            if p.active {
                Slot { tf_index: idx, value: p.predicted_low * (1.0 - BOUND_OFFSET), is_sentinel: false }
            } else {
                Slot { tf_index: idx, value: SENTINEL_LOW, is_sentinel: true }
            }
        })
        .collect();

    let high_bounds = bounds_by_tf_index(&sort_and_decrowd(high_slots, false));
    let low_bounds = bounds_by_tf_index(&sort_and_decrowd(low_slots, true));

    let mut long_level: u8 = 0;
    let mut short_level: u8 = 0;
    let mut long_margins = Vec::new();
    let mut short_margins = Vec::new();

    for (idx, p) in predictions.iter().enumerate() {
        if p.predicted_high == p.predicted_low {
            continue;
        }
        if current_price > high_bounds[idx] {
            short_level += 1;
            let margin = (p.predicted_high - current_price) / current_price.abs() * 100.0;
            if margin != 0.0 {
                short_margins.push(margin);
            }
        } else if current_price < low_bounds[idx] {
            long_level += 1;
            let margin = (p.predicted_low - current_price) / current_price.abs() * 100.0;
            if margin != 0.0 {
                long_margins.push(margin);
            }
        }
    }

    let aggregate_margin = |margins: &[f64]| -> f64 {
        if margins.is_empty() {
            0.0
        } else {
            let mean = margins.iter().sum::<f64>() / margins.len() as f64;
            mean.abs().max(0.25)
        }
    };

    Signal {
        coin: coin.to_string(),
        long_level: long_level.min(7),
        short_level: short_level.min(7),
        long_bounds: low_bounds,
        short_bounds: high_bounds,
        long_profit_margin: aggregate_margin(&long_margins),
        short_profit_margin: aggregate_margin(&short_margins),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel_slots(values: Vec<(usize, f64, bool)>) -> Vec<Slot> {
        values
            .into_iter()
            .map(|(tf_index, value, is_sentinel)| Slot { tf_index, value, is_sentinel })
            .collect()
    }

    #[test]
    fn level_counting_counts_bounds_crossed_below_sentinels() {
        // 3 active low bounds {95, 93, 90} plus 4 inactive sentinels:
        // a current price of 91 sits below two of the active bounds.
        let low_bounds = vec![95.0, 93.0, 90.0, SENTINEL_LOW, SENTINEL_LOW, SENTINEL_LOW, SENTINEL_LOW];
        let current_price = 91.0;
        let long_level = low_bounds.iter().filter(|&&b| current_price < b).count();
        assert_eq!(long_level, 2);

        let high_bounds = vec![110.0, 112.0, 120.0, SENTINEL_HIGH, SENTINEL_HIGH, SENTINEL_HIGH, SENTINEL_HIGH];
        let current_price = 115.0;
        let short_level = high_bounds.iter().filter(|&&b| current_price > b).count();
        assert_eq!(short_level, 2);
    }

    #[test]
    fn sort_and_decrowd_never_nudges_a_sentinel() {
        let slots = sentinel_slots(vec![(0, 100.0, false), (1, SENTINEL_HIGH, true)]);
        let result = sort_and_decrowd(slots, false);
        let sentinel = result.iter().find(|s| s.is_sentinel).unwrap();
        assert_eq!(sentinel.value, SENTINEL_HIGH);
    }

    #[test]
    fn sort_and_decrowd_separates_crowded_ascending_values() {
        let slots = sentinel_slots(vec![(0, 100.0, false), (1, 100.01, false), (2, 200.0, false)]);
        let result = sort_and_decrowd(slots, false);
        let a = result.iter().find(|s| s.tf_index == 0).unwrap().value;
        let b = result.iter().find(|s| s.tf_index == 1).unwrap().value;
        assert!(b > a);
    }

    #[test]
    fn generate_signal_on_empty_memory_is_flat() {
        let memories = HashMap::new();
        let signal = generate_signal("BTC", 100.0, 99.0, 101.0, &memories);
        assert_eq!(signal.long_level, 0);
        assert_eq!(signal.short_level, 0);
        assert!(signal.bounds_valid());
    }

    #[test]
    fn weighted_aggregate_ignores_zero_weight_entries() {
        let diffs = vec![0.1, 0.2];
        let weights = vec![0.0, 2.0];
        let agg = weighted_aggregate(&diffs, &weights, &[0, 1]);
        assert!((agg - 0.4).abs() < 1e-9);
    }
}
