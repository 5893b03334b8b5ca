//! Search parameter representation.

use serde::{Deserialize, Serialize};

use crate::{FetchError, Result};

/// Default ownership-hand range.
pub const DEFAULT_HAND: Range = Range { from: 0, to: 1 };

/// Default price floor.
pub const DEFAULT_PRICE_FLOOR: u32 = 4000;

/// Default distance window in kilometres.
pub const DEFAULT_DISTANCE: Range = Range { from: 0, to: 300_000 };

/// An inclusive numeric window rendered as `"{from}-{to}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Lower bound.
    pub from: u32,
    /// Upper bound.
    pub to: u32,
}

impl Range {
    /// Creates a range.
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// Returns the range with its bounds in ascending order.
    pub fn normalized(self) -> Self {
        if self.from <= self.to {
            self
        } else {
            Self {
                from: self.to,
                to: self.from,
            }
        }
    }

    /// Returns whether two ranges share at least one value.
    pub fn overlaps(&self, other: &Range) -> bool {
        let (a, b) = (self.normalized(), other.normalized());
        a.from <= b.to && b.from <= a.to
    }

    /// Renders the query-string form.
    pub fn to_query(&self) -> String {
        format!("{}-{}", self.from, self.to)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

impl std::str::FromStr for Range {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        let (from, to) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| FetchError::InvalidParams(format!("Expected 'from-to', got '{}'", s)))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| FetchError::InvalidParams(format!("Bad range bound '{}': {}", v, e)))
        };
        Ok(Range::new(parse(from)?, parse(to)?))
    }
}

/// A structured search: manufacturer/model pair plus filter windows.
///
/// Used both for URL construction and, through [`SearchParams::cache_key`],
/// as the cache key. The build identifier is never part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchParams {
    /// Manufacturer identifier.
    pub manufacturer: u32,
    /// Model identifier.
    pub model: u32,
    /// Production-year window.
    pub year: Range,
    /// Mileage window.
    #[serde(default = "default_distance")]
    pub distance: Range,
    /// Prior-ownership count window.
    #[serde(default = "default_hand")]
    pub hand: Range,
    /// Minimum price; no upper bound.
    #[serde(default = "default_price_floor")]
    pub price_floor: u32,
}

fn default_distance() -> Range {
    DEFAULT_DISTANCE
}

fn default_hand() -> Range {
    DEFAULT_HAND
}

fn default_price_floor() -> u32 {
    DEFAULT_PRICE_FLOOR
}

impl SearchParams {
    /// Creates parameters for a model over a year window.
    pub fn new(manufacturer: u32, model: u32, year_from: u32, year_to: u32) -> Self {
        Self {
            manufacturer,
            model,
            year: Range::new(year_from, year_to),
            distance: DEFAULT_DISTANCE,
            hand: DEFAULT_HAND,
            price_floor: DEFAULT_PRICE_FLOOR,
        }
    }

    /// Sets the mileage window.
    pub fn with_distance(mut self, from: u32, to: u32) -> Self {
        self.distance = Range::new(from, to);
        self
    }

    /// Sets the ownership-hand window.
    pub fn with_hand(mut self, from: u32, to: u32) -> Self {
        self.hand = Range::new(from, to);
        self
    }

    /// Sets the price floor.
    pub fn with_price_floor(mut self, floor: u32) -> Self {
        self.price_floor = floor;
        self
    }

    /// Checks that both identifiers are present.
    pub fn validate(&self) -> Result<()> {
        if self.manufacturer == 0 {
            return Err(FetchError::InvalidParams("manufacturer id is required".into()));
        }
        if self.model == 0 {
            return Err(FetchError::InvalidParams("model id is required".into()));
        }
        Ok(())
    }

    /// Returns a copy with every window in ascending order.
    pub fn normalized(&self) -> Self {
        Self {
            year: self.year.normalized(),
            distance: self.distance.normalized(),
            hand: self.hand.normalized(),
            ..*self
        }
    }

    /// Returns the cache key; equal field values always give equal keys.
    pub fn cache_key(&self) -> String {
        let p = self.normalized();
        format!(
            "manufacturer={};model={};year={};km={};hand={};price={}",
            p.manufacturer, p.model, p.year, p.distance, p.hand, p.price_floor
        )
    }

    /// Returns the data-endpoint query parameters in a fixed order.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let p = self.normalized();
        vec![
            ("manufacturer", p.manufacturer.to_string()),
            ("model", p.model.to_string()),
            ("year", p.year.to_query()),
            ("km", p.distance.to_query()),
            ("hand", p.hand.to_query()),
            ("price", format!("{}--1", p.price_floor)),
        ]
    }
}

/// A per-range override applied on top of a base [`SearchParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeOverride {
    /// Year window for this range.
    pub year: Range,
    /// Mileage window; the base value is kept when `None`.
    #[serde(default)]
    pub distance: Option<Range>,
}

impl RangeOverride {
    /// Overrides only the year window.
    pub fn years(from: u32, to: u32) -> Self {
        Self {
            year: Range::new(from, to),
            distance: None,
        }
    }

    /// Also overrides the mileage window.
    pub fn with_distance(mut self, from: u32, to: u32) -> Self {
        self.distance = Some(Range::new(from, to));
        self
    }

    /// Produces the concrete parameters for this range.
    pub fn apply(&self, base: &SearchParams) -> SearchParams {
        SearchParams {
            year: self.year,
            distance: self.distance.unwrap_or(base.distance),
            ..*base
        }
    }
}
