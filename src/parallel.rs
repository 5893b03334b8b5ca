//! Concurrent fetching of several parameter ranges.

use std::collections::HashSet;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::client::ListingClient;
use crate::params::{RangeOverride, SearchParams};
use crate::{FetchError, Listing};

/// A range whose pipeline failed.
#[derive(Debug)]
pub struct RangeFailure {
    /// The range that failed.
    pub range: RangeOverride,
    /// Why it failed.
    pub error: FetchError,
}

/// Merged outcome of a parallel range fetch.
#[derive(Debug, Default)]
pub struct RangeReport {
    /// Listings from every successful range, de-duplicated by token.
    pub listings: Vec<Listing>,
    /// Ranges that succeeded.
    pub succeeded: usize,
    /// Ranges that failed, with their errors.
    pub failures: Vec<RangeFailure>,
}

impl RangeReport {
    /// Returns whether every range succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Concatenates batches in order, keeping the first listing for each token.
pub fn merge_listings(batches: impl IntoIterator<Item = Vec<Listing>>) -> Vec<Listing> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|listing| seen.insert(listing.token.clone()))
        .collect()
}

impl ListingClient {
    /// Runs the full pipeline for every range concurrently on this client.
    ///
    /// All ranges share this client's cache and blocking statistics. A failed
    /// or timed-out range is reported in [`RangeReport::failures`] and never
    /// cancels its siblings.
    pub async fn fetch_ranges(&self, base: &SearchParams, ranges: &[RangeOverride]) -> RangeReport {
        let limit = self.range_timeout();
        debug!("Fetching {} ranges concurrently", ranges.len());

        let futures = ranges.iter().map(|range| {
            let params = range.apply(base);
            async move {
                let result = match timeout(limit, self.fetch(&params)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout),
                };
                (*range, result)
            }
        });

        let mut report = RangeReport::default();
        let mut batches = Vec::new();
        for (range, result) in join_all(futures).await {
            match result {
                Ok(listings) => {
                    debug!("Range {} returned {} listings", range.year, listings.len());
                    report.succeeded += 1;
                    batches.push(listings);
                }
                Err(error) => {
                    warn!("Range {} failed: {}", range.year, error);
                    report.failures.push(RangeFailure { range, error });
                }
            }
        }
        report.listings = merge_listings(batches);
        report
    }
}
