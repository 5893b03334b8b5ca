//! listing-fetch CLI - resilient marketplace listing acquisition.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use listing_fetch::{
    blocking::SignatureTarget, BlockingDetector, ChannelOrder, ClientConfig, FetchError,
    FetchReport, Listing, ListingClient, Range, RangeOverride, RelayConfig, SearchParams,
};

/// listing-fetch - Fetch marketplace listings through direct and relay channels
#[derive(Parser)]
#[command(name = "listing-fetch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch listings for a manufacturer/model pair
    Fetch(FetchArgs),

    /// List the blocking signatures in match order
    Signatures {
        /// Configuration file whose extra signatures are appended
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Parser)]
struct FetchArgs {
    /// Manufacturer id
    #[arg(long)]
    manufacturer: u32,

    /// Model id
    #[arg(long)]
    model: u32,

    /// Year ranges (comma-separated, e.g. 2015-2017,2018-2021)
    /// Several ranges are fetched concurrently and merged
    #[arg(short, long, value_delimiter = ',', default_value = "2015-2024")]
    years: Vec<Range>,

    /// Distance range in kilometers
    #[arg(long)]
    km: Option<Range>,

    /// Ownership hand range
    #[arg(long)]
    hand: Option<Range>,

    /// Minimum price
    #[arg(long)]
    price_floor: Option<u32>,

    /// Channel to try first (direct, relay); chosen adaptively when omitted
    #[arg(short, long)]
    prefer: Option<ChannelOrder>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of listings to display
    #[arg(short, long, default_value = "20")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Relay service endpoint
    #[arg(long, env = "RELAY_ENDPOINT")]
    relay_endpoint: Option<String>,

    /// Relay service API key
    #[arg(long, env = "RELAY_API_KEY", hide_env_values = true)]
    relay_api_key: Option<String>,

    /// Relay zone identifier
    #[arg(long, env = "RELAY_ZONE")]
    relay_zone: Option<String>,

    /// Relay egress country code
    #[arg(long, env = "RELAY_COUNTRY")]
    relay_country: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Compact single-line output
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fetch(args) => run_fetch(args).await,
        Commands::Signatures { config } => list_signatures(config),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(ClientConfig::default()),
    }
}

fn list_signatures(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config.as_ref())?;
    let client = ListingClient::new(config)?;
    print_signatures(client.detector());
    Ok(())
}

fn print_signatures(detector: &BlockingDetector) {
    println!("Blocking signatures (first match wins):\n");
    for (i, signature) in detector.signatures().iter().enumerate() {
        let target = match signature.target() {
            SignatureTarget::Body => "body".to_string(),
            SignatureTarget::Header(name) => format!("header {}", name),
        };
        let hard = if signature.kind().is_hard() { " [hard]" } else { "" };
        println!(
            "  {:>2}. {:<24} {:<20} {}{}",
            i + 1,
            signature.kind(),
            target,
            signature.pattern(),
            hard
        );
    }
}

fn relay_from_args(args: &FetchArgs) -> Option<RelayConfig> {
    let api_key = args.relay_api_key.as_ref()?;
    let zone = args.relay_zone.as_ref()?;
    let endpoint = args
        .relay_endpoint
        .clone()
        .unwrap_or_else(listing_fetch::default_relay_endpoint);
    let mut relay = RelayConfig::new(endpoint, api_key, zone);
    if let Some(country) = &args.relay_country {
        relay = relay.with_country(country);
    }
    Some(relay)
}

async fn run_fetch(args: FetchArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(relay) = relay_from_args(&args) {
        config = config.with_relay(relay);
    }
    let client = ListingClient::new(config)?;
    let text = matches!(args.format, OutputFormat::Text);

    if text && !client.has_relay() {
        eprintln!("No relay configured, using the direct channel only");
    }

    let first = args.years.first().copied().unwrap_or(Range::new(2015, 2024));
    let mut base = SearchParams::new(args.manufacturer, args.model, first.from, first.to);
    if let Some(km) = args.km {
        base = base.with_distance(km.from, km.to);
    }
    if let Some(hand) = args.hand {
        base = base.with_hand(hand.from, hand.to);
    }
    if let Some(floor) = args.price_floor {
        base = base.with_price_floor(floor);
    }

    let listings = if args.years.len() > 1 {
        let ranges: Vec<RangeOverride> = args
            .years
            .iter()
            .map(|year| RangeOverride::years(year.from, year.to))
            .collect();
        let report = client.fetch_ranges(&base, &ranges).await;
        for failure in &report.failures {
            eprintln!("Range {} failed: {}", failure.range.year, failure.error);
        }
        if report.succeeded == 0 && !report.failures.is_empty() {
            anyhow::bail!("All {} ranges failed", report.failures.len());
        }
        report.listings
    } else {
        let report = match client.fetch_report(&base, args.prefer).await {
            Ok(report) => report,
            Err(err) => {
                print_failure(&err);
                return Err(err.into());
            }
        };
        if text {
            print_report_summary(&report);
        }
        report.listings
    };

    print_listings(&listings, args.format, args.limit)
}

fn print_report_summary(report: &FetchReport) {
    if report.from_cache {
        eprintln!("Served from cache");
        return;
    }
    if let Some(order) = report.order {
        eprintln!("Channel order: {:?}", order);
    }
    for attempt in &report.attempts {
        eprintln!(
            "  {} #{}: {}{}",
            attempt.channel,
            attempt.attempt,
            attempt.outcome,
            if attempt.build_id_refreshed { " (build id refreshed)" } else { "" }
        );
    }
}

fn print_failure(err: &FetchError) {
    if let Some(kind) = err.failure_kind() {
        eprintln!("Fetch failed ({:?}):", kind);
    }
    for attempt in err.attempts() {
        eprintln!("  {} #{}: {}", attempt.channel, attempt.attempt, attempt.outcome);
    }
}

fn print_listings(listings: &[Listing], format: OutputFormat, limit: usize) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("\n{} listings:\n", listings.len());
            for (i, listing) in listings.iter().take(limit).enumerate() {
                println!("{}. {} - {} ({:?})", i + 1, listing.year, listing.price, listing.seller);
                if let Some(km) = listing.mileage {
                    println!("   Mileage: {} km", km);
                }
                if !listing.location.is_empty() {
                    println!("   Location: {}", listing.location);
                }
                if let Some(hand) = &listing.hand {
                    println!("   Hand: {}", hand);
                }
                println!("   Token: {}", listing.token);
                println!();
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = listings.iter().take(limit).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Compact => {
            for listing in listings.iter().take(limit) {
                println!(
                    "{}\t{}\t{}\t{}",
                    listing.token, listing.year, listing.price, listing.location
                );
            }
        }
    }
    Ok(())
}
