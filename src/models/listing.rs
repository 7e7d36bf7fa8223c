//! Listing data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single marketplace entry returned by a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    /// Source-assigned listing ID
    pub id: String,

    /// Listing title
    pub title: String,

    /// Price as displayed (e.g. "120 € VB")
    pub price: String,

    /// Absolute URL of the listing
    pub link: String,

    /// Location text as displayed, empty if missing
    #[serde(default)]
    pub location: String,
}

/// A listing recorded as seen for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenListing {
    pub query_id: i64,
    pub listing_id: String,
    pub location: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

/// Result of resolving a location name at the marketplace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedLocation {
    /// Numeric location code used in search URLs
    pub code: u32,

    /// Canonical display name
    pub name: String,
}
