//! Counting strategies.
//!
//! A [`Strategy`] answers "is this key over budget for one limit". The only
//! production implementation is [`MovingWindow`]; [`StrategyKind`] selects it
//! by name so configuration can grow new variants without touching callers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::limit::Limit;
use super::store::ExpiringStore;
use crate::clock::Clock;

/// Outcome of evaluating one or more limits for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratelimited {
    /// Whether the key is over budget
    pub limited: bool,
    /// The limit this verdict was evaluated against
    pub limit: Limit,
    /// Requests still permitted in the current window
    pub remaining: u64,
    /// Time until the key's window clears
    pub reset_after: Duration,
}

impl Ratelimited {
    /// `reset_after` in whole milliseconds, saturating at `u64::MAX`.
    pub fn retry_after_ms(&self) -> u64 {
        u64::try_from(self.reset_after.as_millis()).unwrap_or(u64::MAX)
    }
}

/// A per-limit counting algorithm.
pub trait Strategy: Send + Sync {
    /// The limit this strategy enforces.
    fn limit(&self) -> Limit;

    /// Evaluate `key`, charging one request when `increase` is set.
    fn evaluate(&self, key: &str, increase: bool) -> Ratelimited;
}

/// Available strategy implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    MovingWindow,
}

impl StrategyKind {
    /// Build a strategy of this kind for one limit.
    pub fn build(&self, limit: Limit, clock: Arc<dyn Clock>) -> Arc<dyn Strategy> {
        match self {
            StrategyKind::MovingWindow => Arc::new(MovingWindow::new(limit, clock)),
        }
    }
}

/// Sliding-expiry counter.
///
/// Every charged request restarts the key's decay clock to a full window, so
/// a key only resets after it has been idle for the whole window.
pub struct MovingWindow {
    limit: Limit,
    requests: ExpiringStore<u64>,
}

impl MovingWindow {
    /// Create a moving window for `limit`.
    pub fn new(limit: Limit, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            requests: ExpiringStore::new(limit.window_duration(), clock),
        }
    }
}

impl Strategy for MovingWindow {
    fn limit(&self) -> Limit {
        self.limit
    }

    fn evaluate(&self, key: &str, increase: bool) -> Ratelimited {
        let (current, reset_after) = if increase {
            self.requests.update(key, 0, |count| count.saturating_add(1))
        } else {
            let current = self.requests.get_or(key, 0);
            // Nothing was written, so an absent key reports a full window.
            let ttl = self
                .requests
                .ttl(key)
                .unwrap_or_else(|_| self.limit.window_duration());
            (current, ttl)
        };

        let verdict = Ratelimited {
            limited: current > self.limit.requests,
            limit: self.limit,
            remaining: self.limit.requests.saturating_sub(current),
            reset_after,
        };

        trace!(
            key = key,
            limit = %self.limit,
            current = current,
            increase = increase,
            limited = verdict.limited,
            "Evaluated moving window"
        );

        verdict
    }
}
