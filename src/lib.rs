//! # listing-fetch
//!
//! A resilient acquisition client for a single-page-application marketplace
//! API that resists automated access.
//!
//! This library turns a structured search into a list of listings, with
//! support for:
//!
//! - Build-identifier aware URL construction with automatic recovery
//! - Anti-bot page detection on every response, including HTTP 200s
//! - Direct and relay delivery channels chosen from rolling statistics
//! - Bounded per-channel retries with linear backoff
//! - A TTL cache keyed by normalized search parameters
//! - Concurrent fetching of several parameter ranges
//!
//! ## Example
//!
//! ```rust,no_run
//! use listing_fetch::{ClientConfig, ListingClient, RangeOverride, SearchParams};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ListingClient::new(ClientConfig::default())?;
//!
//!     let params = SearchParams::new(19, 10226, 2018, 2021);
//!     for listing in client.fetch(&params).await? {
//!         println!("{} {} {}", listing.year, listing.price, listing.location);
//!     }
//!
//!     let ranges = [RangeOverride::years(2015, 2017), RangeOverride::years(2018, 2021)];
//!     let report = client.fetch_ranges(&params, &ranges).await;
//!     println!("{} listings across ranges", report.listings.len());
//!     Ok(())
//! }
//! ```

mod attempt;
mod build_id;
mod cache;
mod channel;
mod client;
mod config;
mod error;
mod listing;
mod parallel;
mod params;
mod request;
mod retry;
mod strategy;

pub mod blocking;
pub mod channels;

pub use attempt::{AttemptOutcome, FailureKind, FetchAttempt};
pub use blocking::{BlockKind, BlockSignature, BlockingDetector};
pub use build_id::{BuildIdResolver, ExtractionPattern};
pub use cache::{CacheEntry, ResponseCache};
pub use channel::{Channel, ChannelKind, RawResponse};
pub use client::{FetchReport, ListingClient};
pub use config::{default_relay_endpoint, ClientConfig, RelayConfig, SignatureConfig};
pub use error::{FetchError, Result};
pub use listing::{parse_listings, Listing, SellerType};
pub use parallel::{merge_listings, RangeFailure, RangeReport};
pub use params::{Range, RangeOverride, SearchParams};
pub use request::RequestPlanner;
pub use retry::BackoffPolicy;
pub use strategy::{BlockingStats, ChannelOrder, StrategySelector};
