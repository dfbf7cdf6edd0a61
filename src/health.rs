//! Process-wide health monitor: a rolling error count and last-heartbeat
//! timestamp that the trader exposes alongside `trader_status.json` so an
//! external viewer can render health without re-deriving the thresholds.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const STALE_AFTER_SECS: i64 = 120;
const ERROR_WINDOW_SECS: i64 = 300;
const ERROR_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Ok,
    Stale,
    Warning,
    Error,
}

/// One instance per binary, constructed at startup and held for the
/// process lifetime.
pub struct HealthMonitor {
    last_success: Mutex<DateTime<Utc>>,
    errors: Mutex<VecDeque<DateTime<Utc>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            last_success: Mutex::new(Utc::now()),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn record_success(&self) {
        *self.last_success.lock().await = Utc::now();
    }

    pub async fn record_error(&self) {
        let now = Utc::now();
        let mut errors = self.errors.lock().await;
        errors.push_back(now);
        let cutoff = now - Duration::seconds(ERROR_WINDOW_SECS);
        while matches!(errors.front(), Some(ts) if *ts < cutoff) {
            errors.pop_front();
        }
    }

    /// `STALE` when no heartbeat for >120s, else `ERROR` on >=5 errors in
    /// 300s, else `WARNING` on any recent error, else `OK`.
    pub async fn state(&self) -> HealthState {
        let now = Utc::now();
        let last_success = *self.last_success.lock().await;
        if now - last_success > Duration::seconds(STALE_AFTER_SECS) {
            return HealthState::Stale;
        }

        let cutoff = now - Duration::seconds(ERROR_WINDOW_SECS);
        let recent = self.errors.lock().await.iter().filter(|ts| **ts >= cutoff).count();
        if recent >= ERROR_THRESHOLD {
            HealthState::Error
        } else if recent > 0 {
            HealthState::Warning
        } else {
            HealthState::Ok
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
