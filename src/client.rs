//! Listing acquisition pipeline.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::attempt::FetchAttempt;
use crate::blocking::{BlockSignature, BlockingDetector};
use crate::build_id::BuildIdResolver;
use crate::cache::ResponseCache;
use crate::channel::{Channel, ChannelKind};
use crate::channels::{DirectChannel, RelayChannel};
use crate::config::ClientConfig;
use crate::request::RequestPlanner;
use crate::retry::RetryController;
use crate::strategy::{BlockingStats, ChannelOrder, StrategySelector};
use crate::{FetchError, Listing, Result, SearchParams};

/// Outcome of one top-level fetch with its diagnostic history.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Parsed listings.
    pub listings: Vec<Listing>,
    /// Attempts across channels, in order; empty for cache hits.
    pub attempts: Vec<FetchAttempt>,
    /// Channel order used; `None` for cache hits.
    pub order: Option<ChannelOrder>,
    /// Whether the result came from the cache.
    pub from_cache: bool,
}

/// Acquisition client owning all per-session state: the build identifier,
/// the cache and the blocking statistics.
///
/// Share one instance (behind `Arc` or by reference) between concurrent
/// fetches so that what one learns about blocking informs the others.
pub struct ListingClient {
    config: ClientConfig,
    planner: RequestPlanner,
    detector: BlockingDetector,
    resolver: BuildIdResolver,
    cache: ResponseCache,
    selector: StrategySelector,
    direct: Arc<dyn Channel>,
    relay: Option<Arc<dyn Channel>>,
}

impl ListingClient {
    /// Creates a client with reqwest-backed channels.
    ///
    /// The relay channel is only enabled when `config.relay` is set.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let timeout = config.request_timeout();
        let direct: Arc<dyn Channel> = Arc::new(DirectChannel::new(timeout)?);
        let relay = match &config.relay {
            Some(relay) => {
                Some(Arc::new(RelayChannel::new(relay.clone(), timeout)?) as Arc<dyn Channel>)
            }
            None => None,
        };
        Self::with_channels(config, direct, relay)
    }

    /// Creates a client with caller-supplied channels.
    pub fn with_channels(
        config: ClientConfig,
        direct: Arc<dyn Channel>,
        relay: Option<Arc<dyn Channel>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut detector = BlockingDetector::new();
        let extra = config
            .extra_signatures
            .iter()
            .map(BlockSignature::from_config)
            .collect::<Result<Vec<_>>>()?;
        detector.extend(extra);

        Ok(Self {
            planner: RequestPlanner::new(&config)?,
            detector,
            resolver: BuildIdResolver::new(config.default_build_id.clone()),
            cache: ResponseCache::new(config.cache_ttl()),
            selector: StrategySelector::new(
                config.direct_failure_threshold,
                config.direct_staleness(),
            ),
            direct,
            relay,
            config,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the blocking detector.
    pub fn detector(&self) -> &BlockingDetector {
        &self.detector
    }

    /// Returns the response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Returns a snapshot of the blocking statistics.
    pub fn stats(&self) -> BlockingStats {
        self.selector.stats()
    }

    /// Returns the current build identifier.
    pub async fn build_id(&self) -> String {
        self.resolver.current().await
    }

    /// Returns whether a relay channel is available.
    pub fn has_relay(&self) -> bool {
        self.relay.is_some()
    }

    /// Fetches listings for `params`, from cache when fresh.
    ///
    /// The only failures are [`FetchError::InvalidParams`] and
    /// [`FetchError::Exhausted`], which carries every attempt made.
    pub async fn fetch(&self, params: &SearchParams) -> Result<Vec<Listing>> {
        Ok(self.fetch_report(params, None).await?.listings)
    }

    /// Fetches listings with an explicit channel order.
    pub async fn fetch_with_order(
        &self,
        params: &SearchParams,
        order: ChannelOrder,
    ) -> Result<Vec<Listing>> {
        Ok(self.fetch_report(params, Some(order)).await?.listings)
    }

    /// Fetches listings and returns the full attempt history.
    ///
    /// `preference` overrides the order the strategy selector would pick.
    pub async fn fetch_report(
        &self,
        params: &SearchParams,
        preference: Option<ChannelOrder>,
    ) -> Result<FetchReport> {
        params.validate()?;
        let key = params.cache_key();

        if let Some(listings) = self.cache.get(&key).await {
            info!("Cache hit for {} ({} listings)", key, listings.len());
            return Ok(FetchReport {
                listings,
                attempts: Vec::new(),
                order: None,
                from_cache: true,
            });
        }

        self.selector.record_request();
        let order = preference.unwrap_or_else(|| self.selector.choose());
        debug!("Fetching {} with order {:?}", key, order);

        let controller = self.controller();
        let mut attempts = Vec::new();

        for kind in order.channels() {
            let Some(channel) = self.channel(kind) else {
                continue;
            };
            let run = controller.run(channel.as_ref(), params).await;
            attempts.extend(run.attempts);

            if let Some(listings) = run.listings {
                debug!("{} channel returned {} listings", kind, listings.len());
                self.cache.set(key, listings.clone()).await;
                return Ok(FetchReport {
                    listings,
                    attempts,
                    order: Some(order),
                    from_cache: false,
                });
            }
            debug!("{} channel exhausted", kind);
        }

        warn!("All channels exhausted for {} after {} attempts", key, attempts.len());
        Err(FetchError::Exhausted(attempts))
    }

    fn channel(&self, kind: ChannelKind) -> Option<&Arc<dyn Channel>> {
        match kind {
            ChannelKind::Direct => Some(&self.direct),
            ChannelKind::Relay => self.relay.as_ref(),
        }
    }

    fn controller(&self) -> RetryController<'_> {
        RetryController {
            policy: &self.config.backoff,
            detector: &self.detector,
            resolver: &self.resolver,
            planner: &self.planner,
            selector: &self.selector,
            call_timeout: self.config.request_timeout(),
            empty_is_failure: self.config.empty_is_failure,
            refresh_tried: AtomicBool::new(false),
        }
    }

    pub(crate) fn range_timeout(&self) -> Duration {
        self.config.range_timeout()
    }
}
