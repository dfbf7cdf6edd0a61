//! Per-coin, per-timeframe pattern memory: the learned shapes the trainer
//! builds and the signal engine matches against.

mod codec;

use std::path::Path;

use tracing::warn;

use crate::paths::{atomic_write, read_to_string_opt, ProjectPaths};
use crate::types::Timeframe;

/// Number of close-to-open percentage deltas in one pattern.
pub const PATTERN_LENGTH: usize = 2;

/// Seven parallel sequences of equal length, keyed by pattern index. They
/// are never separately grown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternMemory {
    pub patterns: Vec<[f64; PATTERN_LENGTH]>,
    pub high_diffs: Vec<f64>,
    pub low_diffs: Vec<f64>,
    pub weights: Vec<f64>,
    pub weights_high: Vec<f64>,
    pub weights_low: Vec<f64>,
    pub threshold: f64,
}

impl PatternMemory {
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// All seven sequences equal length. Threshold is a scalar, not a
    /// sequence, so it is not part of this check.
    pub fn is_well_formed(&self) -> bool {
        let n = self.patterns.len();
        self.high_diffs.len() == n
            && self.low_diffs.len() == n
            && self.weights.len() == n
            && self.weights_high.len() == n
            && self.weights_low.len() == n
            && self.threshold >= 0.0
    }

    pub fn push(&mut self, pattern: [f64; PATTERN_LENGTH], high_diff: f64, low_diff: f64) {
        self.patterns.push(pattern);
        self.high_diffs.push(high_diff);
        self.low_diffs.push(low_diff);
        self.weights.push(1.0);
        self.weights_high.push(1.0);
        self.weights_low.push(1.0);
    }
}

/// `pattern_distance(a,b) = |a-b| / |(a+b)/2| * 100`, symmetric, zero when
/// both inputs are zero or their mean is zero.
pub fn pattern_distance(a: f64, b: f64) -> f64 {
    let mean = (a + b) / 2.0;
    if mean == 0.0 {
        return 0.0;
    }
    (a - b).abs() / mean.abs() * 100.0
}

/// Average `pattern_distance` over the shared prefix of `current` and
/// `pattern`: the thinker's single-element live pattern matches against
/// the trainer's K=2 stored patterns by averaging over the overlap.
pub fn pattern_match_distance(current: &[f64], pattern: &[f64]) -> f64 {
    let n = current.len().min(pattern.len());
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = (0..n).map(|j| pattern_distance(current[j], pattern[j])).sum();
    sum / n as f64
}

/// Indices of patterns within `threshold` average distance of `current`.
pub fn find_matches(memory: &PatternMemory, current: &[f64], threshold: f64) -> Vec<usize> {
    memory
        .patterns
        .iter()
        .enumerate()
        .filter_map(|(idx, pattern)| {
            if pattern_match_distance(current, pattern) <= threshold {
                Some(idx)
            } else {
                None
            }
        })
        .collect()
}

/// Loads the pattern memory for `coin`/`tf`. Missing or malformed files
/// yield an empty memory; a single corrupt pattern line is skipped without
/// aborting the rest of the load.
pub fn load(paths: &ProjectPaths, coin: &str, tf: Timeframe) -> PatternMemory {
    let patterns_text = read_to_string_opt(&paths.memories_file(coin, tf)).unwrap_or_default();
    let weights_text = read_to_string_opt(&paths.weights_file(coin, tf)).unwrap_or_default();
    let weights_high_text =
        read_to_string_opt(&paths.weights_high_file(coin, tf)).unwrap_or_default();
    let weights_low_text =
        read_to_string_opt(&paths.weights_low_file(coin, tf)).unwrap_or_default();
    let threshold_text = read_to_string_opt(&paths.threshold_file(coin, tf)).unwrap_or_default();

    let (patterns, high_diffs, low_diffs) = codec::decode_patterns(&patterns_text);
    let mut weights = codec::decode_floats(&weights_text);
    let mut weights_high = codec::decode_floats(&weights_high_text);
    let mut weights_low = codec::decode_floats(&weights_low_text);
    let threshold = threshold_text.trim().parse::<f64>().unwrap_or(1.0);

    let n = patterns.len();
    weights.resize(n, 1.0);
    weights_high.resize(n, 1.0);
    weights_low.resize(n, 1.0);

    let memory = PatternMemory {
        patterns,
        high_diffs,
        low_diffs,
        weights,
        weights_high,
        weights_low,
        threshold,
    };

    if !memory.is_well_formed() {
        warn!(coin, timeframe = tf.as_str(), "pattern memory failed well-formedness check after load, using as-is");
    }
    memory
}

/// Whether a memory file already exists for `coin`/`tf`.
pub fn exists(paths: &ProjectPaths, coin: &str, tf: Timeframe) -> bool {
    paths.memories_file(coin, tf).is_file()
}

/// Atomically persists all five on-disk files for one (coin, timeframe)
/// pattern memory.
pub fn save(paths: &ProjectPaths, coin: &str, tf: Timeframe, memory: &PatternMemory) -> std::io::Result<()> {
    let patterns_text = codec::encode_patterns(&memory.patterns, &memory.high_diffs, &memory.low_diffs);
    write_atomic(&paths.memories_file(coin, tf), &patterns_text)?;
    write_atomic(&paths.weights_file(coin, tf), &codec::encode_floats(&memory.weights))?;
    write_atomic(&paths.weights_high_file(coin, tf), &codec::encode_floats(&memory.weights_high))?;
    write_atomic(&paths.weights_low_file(coin, tf), &codec::encode_floats(&memory.weights_low))?;
    write_atomic(&paths.threshold_file(coin, tf), &memory.threshold.to_string())?;
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    atomic_write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_distance_is_symmetric_and_identity() {
        assert_eq!(pattern_distance(1.5, -2.25), pattern_distance(-2.25, 1.5));
        assert_eq!(pattern_distance(3.0, 3.0), 0.0);
        assert_eq!(pattern_distance(0.0, 0.0), 0.0);
    }

    #[test]
    fn memory_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let mut memory = PatternMemory::default();
        memory.push([1.23, -0.45], 0.02, -0.015);
        memory.push([0.0, 0.0], 0.0, 0.0);
        memory.threshold = 1.0;
        memory.weights[0] = -1.5;
        memory.weights_high[1] = 0.5;

        save(&paths, "ETH", Timeframe::H1, &memory).unwrap();
        let loaded = load(&paths, "ETH", Timeframe::H1);

        assert_eq!(loaded.patterns, memory.patterns);
        assert_eq!(loaded.high_diffs, memory.high_diffs);
        assert_eq!(loaded.low_diffs, memory.low_diffs);
        assert_eq!(loaded.weights, memory.weights);
        assert_eq!(loaded.weights_high, memory.weights_high);
        assert!((loaded.threshold - memory.threshold).abs() < 1e-9);
    }

    #[test]
    fn missing_files_yield_empty_memory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let memory = load(&paths, "BTC", Timeframe::D1);
        assert!(memory.is_empty());
    }

    #[test]
    fn corrupt_pattern_line_is_skipped_not_fatal() {
        let text = "1.0 2.0{}0.1{}-0.1~garbage~3.0 4.0{}0.2{}-0.2";
        let (patterns, highs, lows) = codec::decode_patterns(text);
        assert_eq!(patterns.len(), 2);
        assert_eq!(highs.len(), 2);
        assert_eq!(lows.len(), 2);
    }

    proptest::proptest! {
        /// Symmetry and identity over arbitrary finite inputs, not just the
        /// handful of fixed examples above.
        #[test]
        fn pattern_distance_is_symmetric_for_any_finite_inputs(
            a in -1.0e6f64..1.0e6,
            b in -1.0e6f64..1.0e6,
        ) {
            let ab = pattern_distance(a, b);
            let ba = pattern_distance(b, a);
            prop_assert!((ab - ba).abs() < 1e-9);
        }

        #[test]
        fn pattern_distance_identity_is_always_zero(a in -1.0e6f64..1.0e6) {
            prop_assert_eq!(pattern_distance(a, a), 0.0);
        }
    }
}
