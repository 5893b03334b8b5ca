//! Bounded retries on a single channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::attempt::{AttemptOutcome, FetchAttempt};
use crate::blocking::BlockingDetector;
use crate::build_id::BuildIdResolver;
use crate::channel::{Channel, ChannelKind};
use crate::listing::{parse_listings, Listing};
use crate::params::SearchParams;
use crate::request::RequestPlanner;
use crate::strategy::StrategySelector;

/// Retry budget and delay schedule.
///
/// After failed attempt `n` on a channel the controller sleeps
/// `base_delay * n * multiplier`, where the multiplier depends on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Attempts per channel.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay multiplier for the direct channel.
    #[serde(default = "default_direct_multiplier")]
    pub direct_multiplier: u32,
    /// Delay multiplier for the relay channel.
    #[serde(default = "default_relay_multiplier")]
    pub relay_multiplier: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_direct_multiplier() -> u32 {
    1
}

fn default_relay_multiplier() -> u32 {
    2
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            direct_multiplier: default_direct_multiplier(),
            relay_multiplier: default_relay_multiplier(),
        }
    }
}

impl BackoffPolicy {
    /// A policy that never sleeps.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            ..Self::default()
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Delay after failed attempt `attempt` (1-based) on `channel`.
    pub fn delay(&self, channel: ChannelKind, attempt: u32) -> Duration {
        let multiplier = match channel {
            ChannelKind::Direct => self.direct_multiplier,
            ChannelKind::Relay => self.relay_multiplier,
        };
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(u64::from(attempt))
                .saturating_mul(u64::from(multiplier)),
        )
    }
}

/// Result of running one channel to success or exhaustion.
#[derive(Debug, Clone)]
pub struct ChannelRun {
    /// Parsed listings if an attempt succeeded.
    pub listings: Option<Vec<Listing>>,
    /// Every attempt made on the channel, in order.
    pub attempts: Vec<FetchAttempt>,
}

/// Drives attempts on one channel through detection, identifier recovery
/// and parsing.
///
/// One controller serves one top-level fetch across both channels. The
/// landing page is consulted at most once per controller; later not-found
/// responses are plain HTTP errors.
pub struct RetryController<'a> {
    pub(crate) policy: &'a BackoffPolicy,
    pub(crate) detector: &'a BlockingDetector,
    pub(crate) resolver: &'a BuildIdResolver,
    pub(crate) planner: &'a RequestPlanner,
    pub(crate) selector: &'a StrategySelector,
    pub(crate) call_timeout: Duration,
    pub(crate) empty_is_failure: bool,
    pub(crate) refresh_tried: AtomicBool,
}

impl RetryController<'_> {
    /// Runs attempts sequentially until one succeeds, the budget is spent,
    /// or a hard block makes further attempts pointless.
    pub async fn run(&self, channel: &dyn Channel, params: &SearchParams) -> ChannelRun {
        let kind = channel.kind();
        let mut attempts = Vec::new();

        for number in 1..=self.policy.max_attempts {
            let (record, listings) = self.attempt(channel, params, number).await;
            self.selector.record(kind, record.outcome.is_success());
            debug!(
                "{} attempt {}/{}: {} ({})",
                kind, number, self.policy.max_attempts, record.outcome, record.url
            );

            let hard_block = record.outcome.is_hard_block();
            attempts.push(record);

            if let Some(listings) = listings {
                return ChannelRun {
                    listings: Some(listings),
                    attempts,
                };
            }
            if hard_block {
                warn!("Hard block on {} channel, skipping remaining attempts", kind);
                break;
            }
            if number < self.policy.max_attempts {
                let delay = self.policy.delay(kind, number);
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }

        ChannelRun {
            listings: None,
            attempts,
        }
    }

    /// Performs one attempt, including at most one identifier refresh.
    async fn attempt(
        &self,
        channel: &dyn Channel,
        params: &SearchParams,
        number: u32,
    ) -> (FetchAttempt, Option<Vec<Listing>>) {
        let kind = channel.kind();
        let mut build_id = self.resolver.current().await;
        let mut refreshed = false;

        loop {
            let url = match self.planner.data_url(params, &build_id) {
                Ok(url) => url,
                Err(e) => {
                    let outcome = AttemptOutcome::Transport(e.to_string());
                    return (FetchAttempt::new(kind, number, "", outcome), None);
                }
            };

            let request = channel.send(&url, self.planner.data_headers());
            let sent = timeout(self.call_timeout, request).await;
            let outcome = match sent {
                Err(_) => AttemptOutcome::Transport(format!(
                    "timed out after {}s",
                    self.call_timeout.as_secs_f32()
                )),
                Ok(Err(e)) => AttemptOutcome::Transport(e.to_string()),
                Ok(Ok(response)) => {
                    if let Some(block) = self.detector.detect(&response) {
                        AttemptOutcome::Blocked(block)
                    } else if response.is_not_found() {
                        if !self.refresh_tried.swap(true, Ordering::SeqCst) {
                            let fresh = self
                                .resolver
                                .refresh(&build_id, channel, self.planner, self.call_timeout)
                                .await;
                            if let Some(fresh) = fresh {
                                build_id = fresh;
                                refreshed = true;
                                continue;
                            }
                        }
                        AttemptOutcome::Http(response.status)
                    } else if !response.is_success() {
                        AttemptOutcome::Http(response.status)
                    } else {
                        match parse_listings(&response.body) {
                            Ok(listings) if listings.is_empty() && self.empty_is_failure => {
                                AttemptOutcome::Empty
                            }
                            Ok(listings) => {
                                let outcome = AttemptOutcome::Success {
                                    listings: listings.len(),
                                };
                                let record = FetchAttempt::new(kind, number, url, outcome)
                                    .with_refresh(refreshed);
                                return (record, Some(listings));
                            }
                            Err(e) => AttemptOutcome::Parse(e.to_string()),
                        }
                    }
                }
            };

            let record =
                FetchAttempt::new(kind, number, url, outcome).with_refresh(refreshed);
            return (record, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::BlockKind;
    use crate::channel::RawResponse;
    use crate::config::ClientConfig;
    use crate::{FetchError, Result};
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses and records requested URLs.
    struct ScriptedChannel {
        kind: ChannelKind,
        script: Mutex<VecDeque<Result<RawResponse>>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedChannel {
        fn new(kind: ChannelKind, script: Vec<Result<RawResponse>>) -> Self {
            Self {
                kind,
                script: Mutex::new(script.into()),
                urls: Mutex::new(Vec::new()),
            }
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, url: &str, _headers: &HeaderMap) -> Result<RawResponse> {
            self.urls.lock().unwrap().push(url.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::new(500, "script exhausted")))
        }
    }

    struct Fixture {
        policy: BackoffPolicy,
        detector: BlockingDetector,
        resolver: BuildIdResolver,
        planner: RequestPlanner,
        selector: StrategySelector,
    }

    impl Fixture {
        fn new(max_attempts: u32) -> Self {
            Self {
                policy: BackoffPolicy::immediate(max_attempts),
                detector: BlockingDetector::new(),
                resolver: BuildIdResolver::new("old"),
                planner: RequestPlanner::new(&ClientConfig::default()).unwrap(),
                selector: StrategySelector::new(3, Duration::from_secs(3600)),
            }
        }

        fn controller(&self, empty_is_failure: bool) -> RetryController<'_> {
            RetryController {
                policy: &self.policy,
                detector: &self.detector,
                resolver: &self.resolver,
                planner: &self.planner,
                selector: &self.selector,
                call_timeout: Duration::from_secs(5),
                empty_is_failure,
                refresh_tried: AtomicBool::new(false),
            }
        }
    }

    fn feed(tokens: &[&str]) -> String {
        let items: Vec<_> = tokens
            .iter()
            .map(|t| {
                serde_json::json!({
                    "token": t, "price": 10000, "vehicleDates": { "yearOfProduction": 2018 }
                })
            })
            .collect();
        serde_json::json!({
            "pageProps": { "dehydratedState": { "queries": [
                { "state": { "data": { "private": items } } }
            ] } }
        })
        .to_string()
    }

    fn params() -> SearchParams {
        SearchParams::new(19, 10226, 2018, 2021)
    }

    const NEW_BUILD_PAGE: &str =
        r#"<script id="__NEXT_DATA__" type="application/json">{"buildId":"new"}</script>"#;

    #[test]
    fn test_backoff_delay_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(ChannelKind::Direct, 1), Duration::from_millis(1000));
        assert_eq!(policy.delay(ChannelKind::Direct, 3), Duration::from_millis(3000));
        assert_eq!(policy.delay(ChannelKind::Relay, 1), Duration::from_millis(2000));
        assert_eq!(policy.delay(ChannelKind::Relay, 2), Duration::from_millis(4000));
        assert!(BackoffPolicy::immediate(3).delay(ChannelKind::Relay, 3).is_zero());
    }

    #[test]
    fn test_backoff_deserialization_defaults() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"max_attempts":5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.relay_multiplier, 2);
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let fx = Fixture::new(3);
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![Ok(RawResponse::new(200, feed(&["a", "b"])))],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert_eq!(run.listings.unwrap().len(), 2);
        assert_eq!(run.attempts.len(), 1);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Success { listings: 2 });
        assert_eq!(fx.selector.stats().consecutive_direct_failures, 0);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let fx = Fixture::new(3);
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![
                Err(FetchError::Other("connection refused".into())),
                Ok(RawResponse::new(502, "bad gateway")),
                Ok(RawResponse::new(200, feed(&["a"]))),
            ],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert!(run.listings.is_some());
        assert_eq!(run.attempts.len(), 3);
        assert!(matches!(run.attempts[0].outcome, AttemptOutcome::Transport(_)));
        assert_eq!(run.attempts[1].outcome, AttemptOutcome::Http(502));
        assert_eq!(run.attempts[2].attempt, 3);
    }

    #[tokio::test]
    async fn test_never_exceeds_max_attempts() {
        let fx = Fixture::new(4);
        let channel = ScriptedChannel::new(ChannelKind::Relay, vec![]);
        let run = fx.controller(false).run(&channel, &params()).await;
        assert!(run.listings.is_none());
        assert_eq!(run.attempts.len(), 4);
        assert_eq!(channel.urls().len(), 4);
        assert!((fx.selector.stats().relay_success_rate - 0.9f64.powi(4)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_hard_block_stops_channel() {
        let fx = Fixture::new(3);
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![Ok(RawResponse::new(200, "<title>ShieldSquare</title> Are you for real?"))],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert!(run.listings.is_none());
        assert_eq!(run.attempts.len(), 1);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Blocked(BlockKind::ChallengePage));
        assert_eq!(channel.urls().len(), 1);
    }

    #[tokio::test]
    async fn test_soft_block_consumes_budget() {
        let fx = Fixture::new(3);
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![
                Ok(RawResponse::new(429, "Too Many Requests")),
                Ok(RawResponse::new(200, feed(&["a"]))),
            ],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert!(run.listings.is_some());
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Blocked(BlockKind::RateLimited));
    }

    #[tokio::test]
    async fn test_not_found_refreshes_and_retries_once() {
        let fx = Fixture::new(3);
        let landing = NEW_BUILD_PAGE;
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![
                Ok(RawResponse::new(404, "")),
                Ok(RawResponse::new(200, landing)),
                Ok(RawResponse::new(200, feed(&["a"]))),
            ],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert!(run.listings.is_some());
        assert_eq!(run.attempts.len(), 1);
        assert!(run.attempts[0].build_id_refreshed);
        assert!(run.attempts[0].url.contains("/_next/data/new/"));

        let urls = channel.urls();
        assert_eq!(urls.len(), 3);
        assert!(urls[0].contains("/_next/data/old/"));
        assert!(urls[1].ends_with("/vehicles/cars"));
        assert_eq!(fx.resolver.current().await, "new");
    }

    #[tokio::test]
    async fn test_not_found_without_new_identifier_is_http_error() {
        let fx = Fixture::new(1);
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![Ok(RawResponse::new(404, "")), Ok(RawResponse::new(200, "<html></html>"))],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert_eq!(run.attempts.len(), 1);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Http(404));
        assert!(!run.attempts[0].build_id_refreshed);
        assert_eq!(fx.resolver.current().await, "old");
    }

    #[tokio::test]
    async fn test_second_not_found_does_not_refresh_again() {
        let fx = Fixture::new(1);
        let landing = NEW_BUILD_PAGE;
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![
                Ok(RawResponse::new(404, "")),
                Ok(RawResponse::new(200, landing)),
                Ok(RawResponse::new(404, "")),
            ],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Http(404));
        assert!(run.attempts[0].build_id_refreshed);
        assert_eq!(channel.urls().len(), 3);
    }

    #[tokio::test]
    async fn test_landing_page_fetched_once_per_fetch() {
        let fx = Fixture::new(3);
        let direct = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![
                Ok(RawResponse::new(404, "")),
                Ok(RawResponse::new(200, "<html>no identifier</html>")),
                Ok(RawResponse::new(404, "")),
                Ok(RawResponse::new(404, "")),
            ],
        );
        let relay = ScriptedChannel::new(
            ChannelKind::Relay,
            vec![
                Ok(RawResponse::new(404, "")),
                Ok(RawResponse::new(404, "")),
                Ok(RawResponse::new(404, "")),
            ],
        );

        let controller = fx.controller(false);
        let direct_run = controller.run(&direct, &params()).await;
        let relay_run = controller.run(&relay, &params()).await;

        assert_eq!(direct_run.attempts.len(), 3);
        assert_eq!(relay_run.attempts.len(), 3);
        assert!(direct_run
            .attempts
            .iter()
            .chain(&relay_run.attempts)
            .all(|a| a.outcome == AttemptOutcome::Http(404)));

        let landing_calls = direct
            .urls()
            .iter()
            .chain(&relay.urls())
            .filter(|u| u.ends_with("/vehicles/cars"))
            .count();
        assert_eq!(landing_calls, 1);
        assert_eq!(direct.urls().len() + relay.urls().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_landing_page_is_bounded_by_call_timeout() {
        struct StallOnLanding;

        #[async_trait]
        impl Channel for StallOnLanding {
            fn kind(&self) -> ChannelKind {
                ChannelKind::Direct
            }

            async fn send(&self, url: &str, _headers: &HeaderMap) -> Result<RawResponse> {
                if url.ends_with("/vehicles/cars") {
                    std::future::pending().await
                } else {
                    Ok(RawResponse::new(404, ""))
                }
            }
        }

        let fx = Fixture::new(2);
        let run = tokio::time::timeout(
            Duration::from_secs(3600),
            fx.controller(false).run(&StallOnLanding, &params()),
        )
        .await
        .unwrap();
        assert_eq!(run.attempts.len(), 2);
        assert!(run
            .attempts
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Http(404)));
    }

    #[tokio::test]
    async fn test_parse_error_counts_against_budget() {
        let fx = Fixture::new(2);
        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![
                Ok(RawResponse::new(200, "{\"unexpected\":true}")),
                Ok(RawResponse::new(200, feed(&["a"]))),
            ],
        );
        let run = fx.controller(false).run(&channel, &params()).await;
        assert!(matches!(run.attempts[0].outcome, AttemptOutcome::Parse(_)));
        assert_eq!(run.attempts.len(), 2);
        assert!(run.listings.is_some());
    }

    #[tokio::test]
    async fn test_empty_result() {
        let fx = Fixture::new(2);
        let channel =
            ScriptedChannel::new(ChannelKind::Direct, vec![Ok(RawResponse::new(200, feed(&[])))]);
        let run = fx.controller(false).run(&channel, &params()).await;
        assert_eq!(run.listings, Some(vec![]));

        let channel = ScriptedChannel::new(
            ChannelKind::Direct,
            vec![Ok(RawResponse::new(200, feed(&[]))), Ok(RawResponse::new(200, feed(&[])))],
        );
        let run = fx.controller(true).run(&channel, &params()).await;
        assert!(run.listings.is_none());
        assert_eq!(run.attempts.len(), 2);
        assert_eq!(run.attempts[1].outcome, AttemptOutcome::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let mut fx = Fixture::new(3);
        fx.policy = BackoffPolicy::immediate(3).with_base_delay(Duration::from_millis(100));
        let channel = ScriptedChannel::new(ChannelKind::Relay, vec![]);
        let start = tokio::time::Instant::now();
        let run = fx.controller(false).run(&channel, &params()).await;
        assert_eq!(run.attempts.len(), 3);
        // Relay: 100*1*2 + 100*2*2, no sleep after the final attempt.
        assert!(start.elapsed() >= Duration::from_millis(600));
        assert!(start.elapsed() < Duration::from_millis(1000));
    }
}
