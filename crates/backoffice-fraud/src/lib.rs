//! Per-card sliding-window transaction counter.
//!
//! History lives only in memory and is lost on restart. Each card's window is
//! guarded by its map shard, so calls for the same card are serialized while
//! calls for cards in other shards proceed independently.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FraudPolicy {
    pub max_transactions: usize,
    pub time_window_ms: i64,
}

impl Default for FraudPolicy {
    fn default() -> Self {
        Self {
            max_transactions: 5,
            time_window_ms: 60_000,
        }
    }
}

pub struct FraudWindow {
    policy: FraudPolicy,
    history: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl FraudWindow {
    pub fn new(policy: FraudPolicy) -> Self {
        Self {
            policy,
            history: DashMap::new(),
        }
    }

    pub fn policy(&self) -> FraudPolicy {
        self.policy
    }

    /// Records an event for `card_id` at `now` and reports whether the card
    /// has exceeded the allowed count inside the window.
    pub fn record(&self, card_id: &str, now: DateTime<Utc>) -> bool {
        let window_start = now - Duration::milliseconds(self.policy.time_window_ms);
        let mut events = self.history.entry(card_id.to_string()).or_default();

        while events.front().is_some_and(|seen| *seen < window_start) {
            events.pop_front();
        }
        events.push_back(now);

        let suspicious = events.len() > self.policy.max_transactions;
        if suspicious {
            warn!(
                card_id,
                count = events.len(),
                max = self.policy.max_transactions,
                "suspicious card activity"
            );
        }
        suspicious
    }

    /// Number of events currently inside the window for `card_id`.
    pub fn recent(&self, card_id: &str) -> usize {
        self.history.get(card_id).map_or(0, |events| events.len())
    }

    /// Drops cards whose newest event is older than the window.
    pub fn purge_idle(&self, now: DateTime<Utc>) {
        let window_start = now - Duration::milliseconds(self.policy.time_window_ms);
        self.history
            .retain(|_, events| events.back().is_some_and(|last| *last >= window_start));
    }
}
