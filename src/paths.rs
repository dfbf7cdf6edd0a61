//! Resolves the on-disk project layout shared by the three loops.
//!
//! BTC is historically rooted at `<base>/` itself; every other coin gets its
//! own `<base>/<COIN>/` subfolder. All per-coin file names below must match
//! the legacy layout bit-for-bit since other processes parse them.

use std::path::{Path, PathBuf};

use crate::types::Timeframe;

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    base: PathBuf,
}

impl ProjectPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The folder a coin's per-coin files live in. BTC uses `<base>/`
    /// itself; every other coin gets `<base>/<COIN>/`.
    pub fn coin_dir(&self, coin: &str) -> PathBuf {
        if coin.eq_ignore_ascii_case("BTC") {
            self.base.clone()
        } else {
            self.base.join(coin)
        }
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base.join("gui_settings.json")
    }

    pub fn killer_file(&self) -> PathBuf {
        self.base.join("killer.txt")
    }

    pub fn hub_data_dir(&self) -> PathBuf {
        self.base.join("hub_data")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn key_file(&self) -> PathBuf {
        self.base.join("b_key.txt")
    }

    pub fn secret_file(&self) -> PathBuf {
        self.base.join("b_secret.txt")
    }

    // --- trainer-owned files -------------------------------------------

    pub fn memories_file(&self, coin: &str, tf: Timeframe) -> PathBuf {
        self.coin_dir(coin).join(format!("memories_{}.txt", tf.as_str()))
    }

    pub fn weights_file(&self, coin: &str, tf: Timeframe) -> PathBuf {
        self.coin_dir(coin).join(format!("memory_weights_{}.txt", tf.as_str()))
    }

    pub fn weights_high_file(&self, coin: &str, tf: Timeframe) -> PathBuf {
        self.coin_dir(coin).join(format!("memory_weights_high_{}.txt", tf.as_str()))
    }

    pub fn weights_low_file(&self, coin: &str, tf: Timeframe) -> PathBuf {
        self.coin_dir(coin).join(format!("memory_weights_low_{}.txt", tf.as_str()))
    }

    pub fn threshold_file(&self, coin: &str, tf: Timeframe) -> PathBuf {
        self.coin_dir(coin).join(format!("neural_perfect_threshold_{}.txt", tf.as_str()))
    }

    pub fn last_training_time_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("trainer_last_training_time.txt")
    }

    pub fn trainer_status_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("trainer_status.json")
    }

    pub fn trainer_checkpoint_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("trainer_checkpoint.json")
    }

    pub fn trainer_progress_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("trainer_progress.json")
    }

    // --- thinker-owned files --------------------------------------------

    pub fn long_dca_signal_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("long_dca_signal.txt")
    }

    pub fn short_dca_signal_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("short_dca_signal.txt")
    }

    pub fn long_profit_margin_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("futures_long_profit_margin.txt")
    }

    pub fn short_profit_margin_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("futures_short_profit_margin.txt")
    }

    pub fn high_bound_prices_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("high_bound_prices.html")
    }

    pub fn low_bound_prices_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join("low_bound_prices.html")
    }

    pub fn current_price_file(&self, coin: &str) -> PathBuf {
        self.coin_dir(coin).join(format!("{}_current_price.txt", coin))
    }

    // --- trader-owned files (hub_data/) ---------------------------------

    pub fn trader_status_file(&self) -> PathBuf {
        self.hub_data_dir().join("trader_status.json")
    }

    pub fn trade_history_file(&self) -> PathBuf {
        self.hub_data_dir().join("trade_history.jsonl")
    }

    pub fn account_value_history_file(&self) -> PathBuf {
        self.hub_data_dir().join("account_value_history.jsonl")
    }
}

/// Atomically writes `contents` to `path`: write to a sibling temp file,
/// then rename over the destination. Mandatory for any file another
/// process reads.
pub fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tmp")
        .to_string();
    tmp_name.push_str(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads a text file, tolerating a missing file by returning `None` instead
/// of an error.
pub fn read_to_string_opt(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}
