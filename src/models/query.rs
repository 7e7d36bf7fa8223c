//! Saved search queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters of a marketplace search as stored with a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SearchParams {
    /// Search term (spaces allowed)
    pub term: String,

    /// Marketplace location code, absent for raw-link queries
    #[serde(default)]
    pub location_code: Option<u32>,

    /// Canonical location name as returned by the marketplace
    #[serde(default)]
    pub location_name: String,

    /// Search radius in kilometres
    pub radius_km: u32,

    /// Lower price bound in euros (inclusive)
    #[serde(default)]
    pub min_price: Option<u32>,

    /// Upper price bound in euros (exclusive)
    #[serde(default)]
    pub max_price: Option<u32>,

    /// Search result URL used verbatim instead of a generated one
    #[serde(default)]
    pub custom_link: Option<String>,
}

impl SearchParams {
    /// Whether any price bound is set.
    pub fn has_price_filter(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some()
    }

    /// Short human-readable label used in logs.
    pub fn label(&self) -> String {
        match &self.custom_link {
            Some(link) => format!("'{}' ({})", self.term, link),
            None => format!(
                "'{}' in {} (+{} km)",
                self.term, self.location_name, self.radius_km
            ),
        }
    }
}

/// A saved, recurring search owned by one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    /// Stable identifier assigned at creation
    pub id: i64,

    /// Recipient (chat) that owns the query and receives its notifications
    pub owner: i64,

    /// What to search for
    pub params: SearchParams,

    /// The previous poll of this query failed
    pub failed_previously: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// User input for creating a query, before location resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRequest {
    pub term: String,
    /// Location name or postal code, resolved by the fetcher
    pub location: String,
    pub radius_km: u32,
    pub max_price: Option<u32>,
    pub min_price: Option<u32>,
    pub custom_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_filter_detection() {
        let mut params = SearchParams {
            term: "bike".into(),
            radius_km: 20,
            ..SearchParams::default()
        };
        assert!(!params.has_price_filter());

        params.min_price = Some(10);
        assert!(params.has_price_filter());
    }

    #[test]
    fn test_label() {
        let params = SearchParams {
            term: "bike".into(),
            location_code: Some(945),
            location_name: "Köln".into(),
            radius_km: 20,
            ..SearchParams::default()
        };
        assert_eq!(params.label(), "'bike' in Köln (+20 km)");
    }
}
