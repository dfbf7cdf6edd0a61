//! Trainer: builds and online-tunes a pattern memory per coin per
//! timeframe from historical candles. Strictly sequential across coins
//! and, within a coin, across the seven timeframes in fixed order.

mod status;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

pub use status::{TrainerCheckpoint, TrainerState, TrainerStatus};

use crate::exchange::MarketDataSource;
use crate::health::HealthMonitor;
use crate::memory::{find_matches, PatternMemory, PATTERN_LENGTH};
use crate::paths::{atomic_write, ProjectPaths};
use crate::retry::RetryPolicy;
use crate::types::{Candle, Timeframe};

/// Target match-set size the threshold self-tunes toward.
const TARGET_MATCH_COUNT: usize = 20;
/// Historical candle cap per (coin, timeframe).
const MAX_CANDLES: usize = 100_000;
/// `killer.txt`/stop-flag poll cadence inside `adjust_weights`.
const STOP_CHECK_EVERY: usize = 50;

pub struct Trainer {
    market: Arc<dyn MarketDataSource>,
    paths: ProjectPaths,
    health: Arc<HealthMonitor>,
}

impl Trainer {
    pub fn new(market: Arc<dyn MarketDataSource>, paths: ProjectPaths, health: Arc<HealthMonitor>) -> Self {
        Self { market, paths, health }
    }

    fn stop_requested(&self) -> bool {
        matches!(
            std::fs::read_to_string(self.paths.killer_file()),
            Ok(contents) if contents.trim() == "yes"
        )
    }

    /// `train(coins, reprocess)`.
    pub async fn train(&self, coins: &[String], reprocess: bool) -> anyhow::Result<()> {
        for coin in coins {
            if self.stop_requested() {
                info!(coin, "stop requested before coin, halting");
                return Ok(());
            }
            self.train_coin(coin, reprocess).await;
        }
        Ok(())
    }

    async fn train_coin(&self, coin: &str, reprocess: bool) {
        if reprocess {
            self.force_retrain_cleanup(coin);
        }

        let start_index = self.resume_index(coin);
        let mut interrupted_at: Option<Timeframe> = None;

        for (tf_index, &tf) in Timeframe::ALL.iter().enumerate() {
            if tf_index < start_index {
                continue;
            }
            if self.stop_requested() {
                interrupted_at = Some(tf);
                break;
            }

            self.write_status(coin, tf, TrainerState::Training);
            self.write_checkpoint(coin, tf_index);

            match self.train_timeframe(coin, tf, reprocess).await {
                Ok(()) => {
                    self.health.record_success().await;
                }
                Err(e) => {
                    warn!(coin, timeframe = tf.as_str(), error = %e, "training step failed, proceeding to next timeframe");
                    self.health.record_error().await;
                }
            }

            if self.stop_requested() {
                interrupted_at = Some(tf);
                break;
            }
        }

        if let Some(tf) = interrupted_at {
            self.write_status(coin, tf, TrainerState::Interrupted);
        } else {
            self.write_status(coin, *Timeframe::ALL.last().unwrap(), TrainerState::Finished);
            self.clear_checkpoint(coin);
            let _ = atomic_write(
                &self.paths.last_training_time_file(coin),
                &Utc::now().timestamp().to_string(),
            );
        }
    }

    async fn train_timeframe(&self, coin: &str, tf: Timeframe, reprocess: bool) -> anyhow::Result<()> {
        let symbol = format!("{}USDT", coin.to_uppercase());
        let candles = RetryPolicy::trainer_fetch()
            .run(|| self.market.get_all_klines(&symbol, tf, MAX_CANDLES))
            .await?;

        if candles.is_empty() {
            return Ok(());
        }

        let (close_pcts, high_pcts, low_pcts) = normalize(&candles);

        let memory = if reprocess || !crate::memory::exists(&self.paths, coin, tf) {
            build_patterns(&close_pcts, &high_pcts, &low_pcts)
        } else {
            let mut memory = crate::memory::load(&self.paths, coin, tf);
            self.adjust_weights(&mut memory, &close_pcts, &high_pcts, &low_pcts);
            memory
        };

        crate::memory::save(&self.paths, coin, tf, &memory)?;
        Ok(())
    }

    /// Single online-tuning pass. Checks the stop flag every
    /// `STOP_CHECK_EVERY` inner iterations and returns early, leaving the
    /// memory as far as it got - the caller persists whatever exists
    /// regardless.
    fn adjust_weights(&self, memory: &mut PatternMemory, close_pcts: &[f64], high_pcts: &[f64], low_pcts: &[f64]) {
        let n = close_pcts.len();
        if n <= PATTERN_LENGTH {
            return;
        }

        // Only high_diffs/low_diffs are persisted alongside each pattern;
        // the close channel has no stored target, so its prediction aggregate
        // is the weighted mean of each matched pattern's own most recent
        // close-to-open delta (its last component) - a naive continuation
        // estimate, compared below against what actually happened next.
        let close_diffs: Vec<f64> = memory
            .patterns
            .iter()
            .map(|p| p[PATTERN_LENGTH - 1])
            .collect();

        for pos in 0..(n - PATTERN_LENGTH) {
            if pos % STOP_CHECK_EVERY == 0 && self.stop_requested() {
                break;
            }

            let current = &close_pcts[pos..pos + PATTERN_LENGTH];
            let matches = find_matches(memory, current, memory.threshold);

            let match_count = matches.len();
            let step = if memory.threshold < 0.1 { 0.001 } else { 0.01 };
            if match_count > TARGET_MATCH_COUNT {
                memory.threshold = (memory.threshold - step).clamp(0.0, 100.0);
            } else {
                memory.threshold = (memory.threshold + step).clamp(0.0, 100.0);
            }

            if matches.is_empty() {
                continue;
            }

            let h_agg = crate::signal::weighted_aggregate(&memory.high_diffs, &memory.weights_high, &matches);
            let l_agg = crate::signal::weighted_aggregate(&memory.low_diffs, &memory.weights_low, &matches);
            let c_agg = crate::signal::weighted_aggregate(&close_diffs, &memory.weights, &matches);

            let target = pos + PATTERN_LENGTH;
            let actual_high = high_pcts[target] / 100.0;
            let actual_low = low_pcts[target] / 100.0;
            let actual_close = close_pcts[target];

            nudge_channel(&mut memory.weights_high, &matches, actual_high, h_agg, 0.0, 2.0);
            nudge_channel(&mut memory.weights_low, &matches, actual_low, l_agg, 0.0, 2.0);
            nudge_channel(&mut memory.weights, &matches, actual_close, c_agg, -2.0, 2.0);
        }
    }

    fn resume_index(&self, coin: &str) -> usize {
        match std::fs::read_to_string(self.paths.trainer_checkpoint_file(coin)) {
            Ok(text) => serde_json::from_str::<TrainerCheckpoint>(&text)
                .map(|c| c.tf_index.min(6))
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn write_status(&self, coin: &str, tf: Timeframe, state: TrainerState) {
        let status = TrainerStatus {
            state,
            coin: coin.to_string(),
            timeframe: tf.as_str().to_string(),
            timestamp: Utc::now().timestamp(),
        };
        if let Ok(text) = serde_json::to_string(&status) {
            let _ = atomic_write(&self.paths.trainer_status_file(coin), &text);
        }
    }

    fn write_checkpoint(&self, coin: &str, tf_index: usize) {
        let checkpoint = TrainerCheckpoint { coin: coin.to_string(), tf_index, timestamp: Utc::now().timestamp() };
        if let Ok(text) = serde_json::to_string(&checkpoint) {
            let _ = atomic_write(&self.paths.trainer_checkpoint_file(coin), &text);
        }
    }

    fn clear_checkpoint(&self, coin: &str) {
        let _ = std::fs::remove_file(self.paths.trainer_checkpoint_file(coin));
    }

    /// Force-retrain cleanup: deletes training-freshness, status,
    /// checkpoint, progress, killer, and all memory/weight/threshold files
    /// for `coin` before starting.
    fn force_retrain_cleanup(&self, coin: &str) {
        let _ = std::fs::remove_file(self.paths.last_training_time_file(coin));
        let _ = std::fs::remove_file(self.paths.trainer_status_file(coin));
        let _ = std::fs::remove_file(self.paths.trainer_checkpoint_file(coin));
        let _ = std::fs::remove_file(self.paths.trainer_progress_file(coin));
        let _ = std::fs::remove_file(self.paths.killer_file());
        for tf in Timeframe::ALL {
            let _ = std::fs::remove_file(self.paths.memories_file(coin, tf));
            let _ = std::fs::remove_file(self.paths.weights_file(coin, tf));
            let _ = std::fs::remove_file(self.paths.weights_high_file(coin, tf));
            let _ = std::fs::remove_file(self.paths.weights_low_file(coin, tf));
            let _ = std::fs::remove_file(self.paths.threshold_file(coin, tf));
        }
    }
}

/// `close_pct = 100*(close-open)/open`, `high_pct`, `low_pct`, all zero
/// when `open == 0`.
fn normalize(candles: &[Candle]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let close_pcts = candles.iter().map(Candle::close_pct).collect();
    let high_pcts = candles.iter().map(Candle::high_pct).collect();
    let low_pcts = candles.iter().map(Candle::low_pct).collect();
    (close_pcts, high_pcts, low_pcts)
}

/// Builds a fresh pattern memory (K=2): for every index `i` with
/// `i+K < N`, `patterns[i] = close_pcts[i..i+K]`, predicting the candle
/// at `i+K`. Initial weights 1.0, initial threshold 1.0.
fn build_patterns(close_pcts: &[f64], high_pcts: &[f64], low_pcts: &[f64]) -> PatternMemory {
    let mut memory = PatternMemory::default();
    let n = close_pcts.len();
    let k = PATTERN_LENGTH;

    let mut i = 0;
    while i + k < n {
        let mut pattern = [0.0; PATTERN_LENGTH];
        pattern.copy_from_slice(&close_pcts[i..i + k]);
        let target = i + k;
        memory.push(pattern, high_pcts[target] / 100.0, low_pcts[target] / 100.0);
        i += 1;
    }
    memory.threshold = 1.0;
    memory
}

/// Compares `aggregate` against `actual` with a 10% tolerance band; nudges
/// every matched index's weight on this channel by +/-0.25 and clamps to
/// `[lo, hi]`.
fn nudge_channel(weights: &mut [f64], matches: &[usize], actual: f64, aggregate: f64, lo: f64, hi: f64) {
    let band = 0.10 * aggregate.abs();
    for &idx in matches {
        if actual > aggregate + band {
            weights[idx] = (weights[idx] + 0.25).clamp(lo, hi);
        } else if actual < aggregate - band {
            weights[idx] = (weights[idx] - 0.25).clamp(lo, hi);
        }
    }
}
