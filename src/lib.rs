//! Pattern-memory core pipeline for a long-only spot auto-trader: trainer,
//! signal engine (thinker), and trader, plus the ambient config, health,
//! logging, retry, and credential plumbing they all share.

pub mod config;
pub mod credentials;
pub mod dca;
pub mod error;
pub mod exchange;
pub mod health;
pub mod logging;
pub mod memory;
pub mod paths;
pub mod retry;
pub mod signal;
pub mod thinker;
pub mod trader;
pub mod trailing;
pub mod trainer;
pub mod types;
