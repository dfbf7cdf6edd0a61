//! The settings file (`gui_settings.json`) and the immutable
//! [`TradingConfig`] snapshot distilled from it. Loading never hard-fails:
//! missing or unparseable keys fall back to defaults.

mod settings;

pub use settings::{load, ConfigHandle, TradingConfig, MIN_ENTRY_USD};
