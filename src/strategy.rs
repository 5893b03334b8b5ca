//! Adaptive channel ordering.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::ChannelKind;

/// Smoothing weight of the newest relay outcome.
const RELAY_EMA_WEIGHT: f64 = 0.1;

/// Rolling, approximate channel health counters.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockingStats {
    /// Direct failures since the last direct success.
    pub consecutive_direct_failures: u32,
    /// When the direct channel last succeeded.
    pub last_direct_success: Option<Instant>,
    /// Exponential moving average of relay outcomes (1.0 = always succeeds).
    pub relay_success_rate: f64,
    /// Top-level fetches that reached the network.
    pub total_requests: u64,
}

impl Default for BlockingStats {
    fn default() -> Self {
        Self {
            consecutive_direct_failures: 0,
            last_direct_success: None,
            relay_success_rate: 1.0,
            total_requests: 0,
        }
    }
}

/// Order in which channels are tried for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    /// Direct, then relay.
    DirectFirst,
    /// Relay, then direct.
    RelayFirst,
}

impl ChannelOrder {
    /// Returns the channels in order.
    pub fn channels(&self) -> [ChannelKind; 2] {
        match self {
            ChannelOrder::DirectFirst => [ChannelKind::Direct, ChannelKind::Relay],
            ChannelOrder::RelayFirst => [ChannelKind::Relay, ChannelKind::Direct],
        }
    }
}

impl std::str::FromStr for ChannelOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "direct_first" | "direct-first" => Ok(ChannelOrder::DirectFirst),
            "relay" | "proxy" | "relay_first" | "relay-first" => Ok(ChannelOrder::RelayFirst),
            other => Err(format!("unknown channel order '{}'", other)),
        }
    }
}

/// Picks the channel order from [`BlockingStats`].
///
/// Owned by one client; concurrent pipelines update it under a mutex.
#[derive(Debug)]
pub struct StrategySelector {
    stats: Mutex<BlockingStats>,
    failure_threshold: u32,
    staleness: Duration,
}

impl StrategySelector {
    /// Creates a selector with fresh statistics.
    pub fn new(failure_threshold: u32, staleness: Duration) -> Self {
        Self::with_stats(BlockingStats::default(), failure_threshold, staleness)
    }

    /// Creates a selector seeded with existing statistics.
    pub fn with_stats(stats: BlockingStats, failure_threshold: u32, staleness: Duration) -> Self {
        Self {
            stats: Mutex::new(stats),
            failure_threshold,
            staleness,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BlockingStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Chooses the order for a fetch starting now.
    pub fn choose(&self) -> ChannelOrder {
        self.choose_at(Instant::now())
    }

    /// Chooses the order as of `now`.
    pub fn choose_at(&self, now: Instant) -> ChannelOrder {
        let stats = self.lock();
        if stats.consecutive_direct_failures >= self.failure_threshold {
            debug!(
                "{} consecutive direct failures, going relay first",
                stats.consecutive_direct_failures
            );
            return ChannelOrder::RelayFirst;
        }
        if let Some(last) = stats.last_direct_success {
            if now.saturating_duration_since(last) > self.staleness {
                debug!("Last direct success is stale, going relay first");
                return ChannelOrder::RelayFirst;
            }
        }
        ChannelOrder::DirectFirst
    }

    /// Records one channel attempt outcome.
    pub fn record(&self, channel: ChannelKind, success: bool) {
        let mut stats = self.lock();
        match (channel, success) {
            (ChannelKind::Direct, true) => {
                stats.consecutive_direct_failures = 0;
                stats.last_direct_success = Some(Instant::now());
            }
            (ChannelKind::Direct, false) => {
                stats.consecutive_direct_failures =
                    stats.consecutive_direct_failures.saturating_add(1);
            }
            (ChannelKind::Relay, success) => {
                let outcome = if success { 1.0 } else { 0.0 };
                stats.relay_success_rate = RELAY_EMA_WEIGHT * outcome
                    + (1.0 - RELAY_EMA_WEIGHT) * stats.relay_success_rate;
            }
        }
    }

    /// Counts a top-level fetch that went to the network.
    pub fn record_request(&self) {
        self.lock().total_requests += 1;
    }

    /// Returns a copy of the current statistics.
    pub fn stats(&self) -> BlockingStats {
        self.lock().clone()
    }
}
