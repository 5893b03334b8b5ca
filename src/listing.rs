//! Marketplace listing types and response parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{FetchError, Result};

/// Who is selling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellerType {
    /// Commercial seller.
    Dealer,
    /// Private seller.
    Private,
}

/// A single marketplace listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Unique listing token.
    pub token: String,
    /// Asking price.
    pub price: u64,
    /// Production year.
    pub year: u32,
    /// Odometer reading, when listed.
    pub mileage: Option<u32>,
    /// Location text.
    pub location: String,
    /// Seller classification.
    pub seller: SellerType,
    /// Image URLs, cover first.
    pub images: Vec<String>,
    /// Ownership-hand text.
    pub hand: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    token: Option<String>,
    price: Option<u64>,
    vehicle_dates: Option<RawVehicleDates>,
    km: Option<u32>,
    address: Option<RawAddress>,
    meta_data: Option<RawMetaData>,
    hand: Option<RawText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVehicleDates {
    year_of_production: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    city: Option<RawText>,
    area: Option<RawText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetaData {
    cover_image: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    text: Option<String>,
}

impl RawListing {
    fn into_listing(self, seller: SellerType) -> Option<Listing> {
        let token = self.token.filter(|t| !t.is_empty())?;
        let price = self.price?;
        let year = self.vehicle_dates?.year_of_production?;

        let location = self
            .address
            .map(|a| {
                [a.city, a.area]
                    .into_iter()
                    .flatten()
                    .filter_map(|t| t.text)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        let images = self
            .meta_data
            .map(|m| {
                let mut images: Vec<String> = m.cover_image.into_iter().collect();
                for image in m.images {
                    if !images.contains(&image) {
                        images.push(image);
                    }
                }
                images
            })
            .unwrap_or_default();

        Some(Listing {
            token,
            price,
            year,
            mileage: self.km,
            location,
            seller,
            images,
            hand: self.hand.and_then(|h| h.text),
        })
    }
}

/// Locates the query result holding `commercial`/`private` seller arrays.
fn find_feed(doc: &Value) -> Option<&serde_json::Map<String, Value>> {
    let queries = doc
        .pointer("/pageProps/dehydratedState/queries")?
        .as_array()?;
    queries.iter().find_map(|q| {
        let data = q.pointer("/state/data")?.as_object()?;
        (data.contains_key("commercial") || data.contains_key("private")).then_some(data)
    })
}

/// Parses a data-endpoint body into listings, dealers first.
///
/// Fails when the body is not JSON or has no query result with seller
/// arrays. Individual entries missing a token, price or year are skipped.
pub fn parse_listings(body: &str) -> Result<Vec<Listing>> {
    let doc: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("body is not JSON: {}", e)))?;
    let feed = find_feed(&doc)
        .ok_or_else(|| FetchError::Parse("no listing feed in query results".into()))?;

    let mut listings = Vec::new();
    let mut skipped = 0usize;
    for (field, seller) in [("commercial", SellerType::Dealer), ("private", SellerType::Private)] {
        let Some(items) = feed.get(field) else {
            continue;
        };
        let items = items
            .as_array()
            .ok_or_else(|| FetchError::Parse(format!("'{}' is not an array", field)))?;
        for item in items {
            match serde_json::from_value::<RawListing>(item.clone())
                .ok()
                .and_then(|raw| raw.into_listing(seller))
            {
                Some(listing) => listings.push(listing),
                None => skipped += 1,
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed listing entries", skipped);
    }
    Ok(listings)
}
