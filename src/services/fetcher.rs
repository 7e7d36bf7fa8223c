// src/services/fetcher.rs

//! Listing fetcher service.
//!
//! Loads a marketplace search result page and extracts listings using the
//! configured CSS selectors. Also resolves location names to the numeric
//! codes used in search URLs.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{FetcherConfig, Listing, ListingSelectors, ResolvedLocation, SearchParams};
use crate::utils::{http, normalize_whitespace, parse_price, resolve_url};

/// Price text of listings given away for free; never filtered out.
const FREE_PRICE: &str = "zu verschenken";

/// Source of current listings for a search.
#[async_trait]
pub trait ListingFetcher: Send + Sync {
    /// Fetch the listings currently visible for the search, in page order.
    async fn fetch(&self, params: &SearchParams) -> Result<Vec<Listing>>;

    /// Resolve a location name or postal code.
    async fn resolve_location(&self, name: &str) -> Result<ResolvedLocation>;
}

/// Price bounds applied to extracted listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceFilter {
    /// Inclusive lower bound
    pub min: Option<u32>,
    /// Exclusive upper bound
    pub max: Option<u32>,
}

impl PriceFilter {
    pub fn from_params(params: &SearchParams) -> Self {
        Self {
            min: params.min_price,
            max: params.max_price,
        }
    }

    /// Whether a listing with this displayed price passes the filter.
    pub fn accepts(&self, price_text: &str) -> bool {
        if self.min.is_none() && self.max.is_none() {
            return true;
        }
        if price_text.trim().eq_ignore_ascii_case(FREE_PRICE) {
            return true;
        }

        let Some(price) = parse_price(price_text) else {
            log::debug!("Dropping listing with unparsable price '{}'", price_text);
            return false;
        };

        if self.max.is_some_and(|max| price >= max) {
            return false;
        }
        if self.min.is_some_and(|min| price < min) {
            return false;
        }
        true
    }
}

/// Selectors compiled once at construction.
#[derive(Debug)]
pub struct CompiledSelectors {
    row: Selector,
    article: Selector,
    link: Selector,
    price: Selector,
    location: Selector,
    id_attr: String,
    sponsored_class: String,
}

impl CompiledSelectors {
    pub fn compile(config: &ListingSelectors) -> Result<Self> {
        Ok(Self {
            row: parse_selector(&config.row)?,
            article: parse_selector(&config.article)?,
            link: parse_selector(&config.link)?,
            price: parse_selector(&config.price)?,
            location: parse_selector(&config.location)?,
            id_attr: config.id_attr.clone(),
            sponsored_class: config.sponsored_class.clone(),
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Extract listings from a search result page.
///
/// Sponsored rows and rows without a listing ID are skipped, as are rows
/// rejected by the price filter.
pub fn parse_listings(
    html: &str,
    selectors: &CompiledSelectors,
    base_url: &Url,
    filter: PriceFilter,
) -> Vec<Listing> {
    let document = Html::parse_document(html);
    document
        .select(&selectors.row)
        .filter(|row| !is_sponsored(row, &selectors.sponsored_class))
        .filter_map(|row| parse_row(&row, selectors, base_url))
        .filter(|listing| filter.accepts(&listing.price))
        .collect()
}

fn is_sponsored(row: &ElementRef, sponsored_class: &str) -> bool {
    !sponsored_class.is_empty()
        && row
            .value()
            .attr("class")
            .is_some_and(|class| class.contains(sponsored_class))
}

fn parse_row(row: &ElementRef, selectors: &CompiledSelectors, base_url: &Url) -> Option<Listing> {
    let id = row
        .select(&selectors.article)
        .next()?
        .value()
        .attr(&selectors.id_attr)?
        .trim()
        .to_string();
    if id.is_empty() {
        return None;
    }

    let link_elem = row.select(&selectors.link).next();
    let title = link_elem
        .map(|e| normalize_whitespace(&e.text().collect::<String>()))
        .unwrap_or_default();
    let link = link_elem
        .and_then(|e| e.value().attr("href"))
        .map(|href| resolve_url(base_url, href))
        .unwrap_or_default();
    let price = row
        .select(&selectors.price)
        .next()
        .map(|e| normalize_whitespace(&e.text().collect::<String>()))
        .unwrap_or_default();
    let location = row
        .select(&selectors.location)
        .last()
        .map(|e| normalize_whitespace(&e.text().collect::<String>()))
        .unwrap_or_default();

    Some(Listing {
        id,
        title,
        price,
        link,
        location,
    })
}

/// Ordered `{"_<id>": "<name>"}` object returned by the location lookup.
///
/// Keys carry a one-character prefix followed by the numeric location code;
/// values are display names. Entry order is kept, the first one wins.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LocationSuggestions(pub Vec<(String, String)>);

impl<'de> Deserialize<'de> for LocationSuggestions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = LocationSuggestions;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of location ids to names")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, String>()? {
                    entries.push((key, value));
                }
                Ok(LocationSuggestions(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

impl LocationSuggestions {
    /// Parse the first suggestion into a location code and name.
    pub fn first(&self) -> Result<ResolvedLocation> {
        let (key, name) = self
            .0
            .first()
            .ok_or_else(|| AppError::not_found("no matching location"))?;

        let code = key
            .chars()
            .skip(1)
            .collect::<String>()
            .trim()
            .parse::<u32>()
            .map_err(|e| AppError::validation(format!("bad location key '{key}': {e}")))?;

        Ok(ResolvedLocation {
            code,
            name: name.clone(),
        })
    }
}

/// Fetcher for the Kleinanzeigen marketplace.
pub struct KleinanzeigenFetcher {
    client: Client,
    base_url: Url,
    selectors: CompiledSelectors,
}

impl KleinanzeigenFetcher {
    /// Create a fetcher; fails on an invalid base URL or selector.
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_async_client(config)?,
            base_url: Url::parse(&config.base_url)?,
            selectors: CompiledSelectors::compile(&config.selectors)?,
        })
    }

    /// URL of a result page for the search, or the custom link if set.
    pub fn search_url(&self, params: &SearchParams, page: u32) -> Result<Url> {
        if let Some(link) = &params.custom_link {
            return Ok(Url::parse(link)?);
        }

        let code = params.location_code.ok_or_else(|| {
            AppError::fetch(params.label(), "query has neither location code nor link")
        })?;
        let term = params
            .term
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .replace('/', "-");

        // Segments are percent-encoded, so `#` or `?` in a term stay in the path
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::fetch(params.label(), "base URL cannot carry a path"))?
            .clear()
            .push(&format!("seite:{page}"))
            .push(&format!("s-{term}"))
            .push(&format!("k0l{code}r{radius}", radius = params.radius_km));
        Ok(url)
    }

    /// URL of the location suggestion endpoint for `name`.
    pub fn location_url(&self, name: &str) -> Result<Url> {
        let mut url = self.base_url.join("/s-ort-empfehlungen.json")?;
        url.query_pairs_mut().append_pair("query", name);
        Ok(url)
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            if status == StatusCode::FORBIDDEN {
                log::error!("Received 403 from {}; the IP address might be blocked", url);
            }
            return Err(AppError::fetch(url.as_str(), format!("HTTP {status}")));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ListingFetcher for KleinanzeigenFetcher {
    async fn fetch(&self, params: &SearchParams) -> Result<Vec<Listing>> {
        let url = self.search_url(params, 1)?;
        log::debug!("Fetching listings for {} from {}", params.label(), url);

        let html = self.get_text(&url).await?;
        let listings = parse_listings(
            &html,
            &self.selectors,
            &self.base_url,
            PriceFilter::from_params(params),
        );

        log::debug!("Found {} listings for {}", listings.len(), params.label());
        Ok(listings)
    }

    async fn resolve_location(&self, name: &str) -> Result<ResolvedLocation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("location is empty"));
        }

        let url = self.location_url(name)?;
        let body = self.get_text(&url).await?;
        let suggestions: LocationSuggestions = serde_json::from_str(&body)?;
        let location = suggestions.first()?;

        log::debug!(
            "Resolved location '{}' to {} ({})",
            name,
            location.name,
            location.code
        );
        Ok(location)
    }
}
