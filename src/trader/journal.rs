//! Append-only trade and account-value journals written by the trader.
//! Readers must skip malformed lines without aborting.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::types::{Trade, TradeSide};

pub fn append_trade(path: &Path, trade: &Trade) -> anyhow::Result<()> {
    append_line(path, trade)
}

#[derive(Debug, Serialize)]
struct AccountValuePoint {
    value: String,
    timestamp: DateTime<Utc>,
}

pub fn append_account_value(path: &Path, value: rust_decimal::Decimal, timestamp: DateTime<Utc>) -> anyhow::Result<()> {
    append_line(path, &AccountValuePoint { value: value.to_string(), timestamp })
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(value)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Reads the trade journal tolerantly, skipping unparseable lines, so the
/// DCA rate limiter can be seeded from the trade journal on restart.
pub fn read_trade_history(path: &Path) -> Vec<Trade> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Trade>(line) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(error = %e, "skipping malformed trade journal line");
                None
            }
        })
        .collect()
}

/// `(is_buy, timestamp)` pairs for one coin, chronologically ordered, for
/// seeding a `DcaRateLimiter`.
pub fn dca_history_for(path: &Path, coin: &str) -> Vec<(bool, DateTime<Utc>)> {
    let mut history: Vec<(bool, DateTime<Utc>)> = read_trade_history(path)
        .into_iter()
        .filter(|t| t.symbol.eq_ignore_ascii_case(coin))
        .map(|t| (t.side == TradeSide::Buy, t.timestamp))
        .collect();
    history.sort_by_key(|(_, ts)| *ts);
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_history.jsonl");
        let trade = Trade {
            timestamp: Utc::now(),
            side: TradeSide::Buy,
            tag: "entry".to_string(),
            symbol: "BTC".to_string(),
            qty: dec!(0.1),
            price: dec!(50000),
            pnl_pct: None,
            fees_usd: None,
            order_id: None,
        };
        append_trade(&path, &trade).unwrap();
        append_trade(&path, &trade).unwrap();

        let history = read_trade_history(&path);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_history.jsonl");
        std::fs::write(&path, "{not json}\n{\"ts\":\"bad\"}\n").unwrap();
        let history = read_trade_history(&path);
        assert!(history.is_empty());
    }

    #[test]
    fn missing_file_yields_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        assert!(read_trade_history(&path).is_empty());
    }
}
