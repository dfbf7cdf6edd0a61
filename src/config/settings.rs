//! `gui_settings.json` parsing and the hot-reloadable [`ConfigHandle`].
//! The file is owned by the GUI; this crate only reads it, tolerating
//! missing keys, unknown keys, and legacy string-with-trailing-percent
//! numeric encodings.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer};
use tokio::sync::{watch, RwLock};
use tracing::warn;

/// Immutable per-run snapshot of the settings recognised by the trainer,
/// thinker, and trader. Defaults mirror the upstream GUI's factory
/// settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingConfig {
    pub coins: Vec<String>,
    pub trade_start_level: u8,
    pub start_allocation_pct: Decimal,
    pub dca_multiplier: Decimal,
    pub dca_levels: Vec<f64>,
    pub max_dca_buys_per_24h: u32,
    pub pm_start_pct_no_dca: Decimal,
    pub pm_start_pct_with_dca: Decimal,
    pub trailing_gap_pct: Decimal,
    pub candles_limit: usize,
    pub ui_refresh_seconds: u64,
    pub chart_refresh_seconds: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            coins: vec!["BTC".to_string()],
            trade_start_level: 3,
            start_allocation_pct: dec!(0.05),
            dca_multiplier: dec!(1.5),
            dca_levels: vec![-3.0, -5.0, -8.0, -12.0],
            max_dca_buys_per_24h: 3,
            pm_start_pct_no_dca: dec!(5),
            pm_start_pct_with_dca: dec!(2),
            trailing_gap_pct: dec!(0.5),
            candles_limit: 1500,
            ui_refresh_seconds: 5,
            chart_refresh_seconds: 30,
        }
    }
}

/// Minimum quote-currency spend on a first entry, regardless of
/// `start_allocation_pct * account_value`.
pub const MIN_ENTRY_USD: Decimal = dec!(0.50);

/// Wire shape of `gui_settings.json`: every field optional/permissive so a
/// partially-written or hand-edited file still loads. Numeric fields
/// accept either a bare number or a legacy `"12.5%"`-style string.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    coins: Option<Vec<String>>,
    trade_start_level: Option<PermissiveNumber>,
    start_allocation_pct: Option<PermissiveNumber>,
    dca_multiplier: Option<PermissiveNumber>,
    dca_levels: Option<Vec<PermissiveNumber>>,
    max_dca_buys_per_24h: Option<PermissiveNumber>,
    pm_start_pct_no_dca: Option<PermissiveNumber>,
    pm_start_pct_with_dca: Option<PermissiveNumber>,
    trailing_gap_pct: Option<PermissiveNumber>,
    candles_limit: Option<PermissiveNumber>,
    ui_refresh_seconds: Option<PermissiveNumber>,
    chart_refresh_seconds: Option<PermissiveNumber>,
}

/// Accepts a JSON number or a string, stripping a trailing `%` before
/// parsing. Numeric values may arrive as strings with a trailing `%`.
#[derive(Debug, Clone, Copy)]
struct PermissiveNumber(f64);

impl<'de> Deserialize<'de> for PermissiveNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }
        let raw = Raw::deserialize(deserializer)?;
        let value = match raw {
            Raw::Number(n) => n,
            Raw::Text(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().unwrap_or(0.0),
        };
        Ok(PermissiveNumber(value))
    }
}

impl PermissiveNumber {
    fn as_f64(&self) -> f64 {
        self.0
    }

    fn as_decimal(&self) -> Decimal {
        Decimal::from_f64_retain(self.0).unwrap_or(Decimal::ZERO)
    }
}

/// Parses `gui_settings.json` into a [`TradingConfig`], substituting
/// defaults for anything missing or unreadable: log, fall back to
/// defaults, continue. Never returns an error.
pub fn load(path: &Path) -> TradingConfig {
    let defaults = TradingConfig::default();
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "settings file unreadable, using defaults");
            return defaults;
        }
    };

    let raw: RawSettings = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "settings file malformed, using defaults");
            return defaults;
        }
    };

    normalize(raw, defaults)
}

fn normalize(raw: RawSettings, defaults: TradingConfig) -> TradingConfig {
    let clamp_pct = |n: &PermissiveNumber| -> Decimal {
        let d = n.as_decimal();
        if d < Decimal::ZERO {
            Decimal::ZERO
        } else {
            d
        }
    };

    let trade_start_level = raw
        .trade_start_level
        .map(|n| n.as_f64().round() as i64)
        .map(|n| n.clamp(1, 7) as u8)
        .unwrap_or(defaults.trade_start_level);

    let coins = raw
        .coins
        .filter(|c| !c.is_empty())
        .map(|c| c.into_iter().map(|s| s.to_uppercase()).collect())
        .unwrap_or(defaults.coins);

    TradingConfig {
        coins,
        trade_start_level,
        start_allocation_pct: raw
            .start_allocation_pct
            .as_ref()
            .map(clamp_pct)
            .unwrap_or(defaults.start_allocation_pct),
        dca_multiplier: raw
            .dca_multiplier
            .as_ref()
            .map(PermissiveNumber::as_decimal)
            .unwrap_or(defaults.dca_multiplier),
        dca_levels: raw
            .dca_levels
            .map(|levels| levels.iter().map(PermissiveNumber::as_f64).collect())
            .filter(|v: &Vec<f64>| !v.is_empty())
            .unwrap_or(defaults.dca_levels),
        max_dca_buys_per_24h: raw
            .max_dca_buys_per_24h
            .map(|n| n.as_f64().max(0.0) as u32)
            .unwrap_or(defaults.max_dca_buys_per_24h),
        pm_start_pct_no_dca: raw
            .pm_start_pct_no_dca
            .as_ref()
            .map(clamp_pct)
            .unwrap_or(defaults.pm_start_pct_no_dca),
        pm_start_pct_with_dca: raw
            .pm_start_pct_with_dca
            .as_ref()
            .map(clamp_pct)
            .unwrap_or(defaults.pm_start_pct_with_dca),
        trailing_gap_pct: raw
            .trailing_gap_pct
            .as_ref()
            .map(clamp_pct)
            .unwrap_or(defaults.trailing_gap_pct),
        candles_limit: raw
            .candles_limit
            .map(|n| n.as_f64().max(1.0) as usize)
            .unwrap_or(defaults.candles_limit),
        ui_refresh_seconds: raw
            .ui_refresh_seconds
            .map(|n| n.as_f64().max(1.0) as u64)
            .unwrap_or(defaults.ui_refresh_seconds),
        chart_refresh_seconds: raw
            .chart_refresh_seconds
            .map(|n| n.as_f64().max(1.0) as u64)
            .unwrap_or(defaults.chart_refresh_seconds),
    }
}

/// Process-wide, explicit-lifecycle holder of the current `TradingConfig`.
/// Re-reads the settings file by modification time and publishes changes on a
/// `tokio::sync::watch` channel rather than requiring every task to poll
/// the lock, the same shape the upstream runtime configuration manager
/// uses for its own hot-reloadable config.
pub struct ConfigHandle {
    path: PathBuf,
    current: RwLock<TradingConfig>,
    last_modified: RwLock<Option<SystemTime>>,
    tx: watch::Sender<TradingConfig>,
}

impl ConfigHandle {
    pub fn new(path: PathBuf) -> Self {
        let initial = load(&path);
        let last_modified = std::fs::metadata(&path).ok().and_then(|m| m.modified().ok());
        let (tx, _rx) = watch::channel(initial.clone());
        Self {
            path,
            current: RwLock::new(initial),
            last_modified: RwLock::new(last_modified),
            tx,
        }
    }

    pub async fn current(&self) -> TradingConfig {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TradingConfig> {
        self.tx.subscribe()
    }

    /// Re-reads the settings file only if its modification time advanced
    /// since the last check; returns `true` if the in-memory config
    /// changed.
    pub async fn reload_if_changed(&self) -> bool {
        let mtime = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
        {
            let last = self.last_modified.read().await;
            if mtime.is_some() && mtime == *last {
                return false;
            }
        }
        *self.last_modified.write().await = mtime;

        let reloaded = load(&self.path);
        let mut current = self.current.write().await;
        if *current == reloaded {
            return false;
        }
        *current = reloaded.clone();
        drop(current);
        let _ = self.tx.send(reloaded);
        true
    }
}
