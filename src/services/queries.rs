//! Query management used by the command layer.
//!
//! Creating a query resolves its location, fetches the current listings once
//! and stores them as the baseline in the same transaction as the query.
//! The baseline is never notified, so only listings that appear after
//! creation reach the owner.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Query, QueryRequest, SearchParams};
use crate::services::ListingFetcher;
use crate::storage::Storage;

/// Create, list and delete the queries of an owner.
pub struct QueryService {
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn ListingFetcher>,
    max_radius_km: u32,
}

impl QueryService {
    pub fn new(
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn ListingFetcher>,
        max_radius_km: u32,
    ) -> Self {
        Self {
            storage,
            fetcher,
            max_radius_km,
        }
    }

    /// Validate, resolve and store a new query with its baseline.
    ///
    /// Nothing is stored when validation, location lookup or the baseline
    /// fetch fails.
    pub async fn create_query(&self, request: QueryRequest, owner: i64) -> Result<Query> {
        self.validate(&request)?;
        let params = self.resolve(request).await?;

        let baseline = self.fetcher.fetch(&params).await.map_err(|e| {
            log::warn!("Baseline fetch for {} failed: {}", params.label(), e);
            e
        })?;

        let query = self
            .storage
            .insert_query(owner, &params, &baseline, Utc::now())
            .await?;

        log::info!(
            "Query {} created for owner {}: {} ({} baseline listings)",
            query.id,
            owner,
            params.label(),
            baseline.len()
        );
        Ok(query)
    }

    pub async fn list_queries(&self, owner: i64) -> Result<Vec<Query>> {
        self.storage.list_queries(owner).await
    }

    /// Delete a query of `owner`; `NotFound` when missing or owned by someone else.
    pub async fn delete_query(&self, id: i64, owner: i64) -> Result<Query> {
        let query = self
            .storage
            .delete_query(id, owner)
            .await?
            .ok_or_else(|| AppError::not_found(format!("query {id}")))?;

        log::info!("Query {} deleted by owner {}", id, owner);
        Ok(query)
    }

    fn validate(&self, request: &QueryRequest) -> Result<()> {
        if request.term.trim().is_empty() {
            return Err(AppError::validation("search term is empty"));
        }
        if request.radius_km > self.max_radius_km {
            return Err(AppError::validation(format!(
                "radius {} km exceeds the maximum of {} km",
                request.radius_km, self.max_radius_km
            )));
        }
        if let (Some(min), Some(max)) = (request.min_price, request.max_price) {
            if min > max {
                return Err(AppError::validation(format!(
                    "minimum price {min} is above maximum price {max}"
                )));
            }
        }
        if let Some(link) = &request.custom_link {
            let url = Url::parse(link.trim())
                .map_err(|e| AppError::validation(format!("invalid link '{link}': {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(AppError::validation(format!(
                    "link must be http or https, got '{}'",
                    url.scheme()
                )));
            }
        }
        Ok(())
    }

    /// Turn the request into stored search parameters.
    ///
    /// Custom-link queries keep the location text as given; all others need
    /// a location the marketplace knows.
    async fn resolve(&self, request: QueryRequest) -> Result<SearchParams> {
        let term = request.term.trim().to_string();

        if let Some(link) = request.custom_link {
            return Ok(SearchParams {
                term,
                location_code: None,
                location_name: request.location.trim().to_string(),
                radius_km: request.radius_km,
                min_price: request.min_price,
                max_price: request.max_price,
                custom_link: Some(link.trim().to_string()),
            });
        }

        let location = self
            .fetcher
            .resolve_location(&request.location)
            .await
            .map_err(|e| match e {
                AppError::Validation(_) => e,
                other => AppError::validation(format!(
                    "location '{}' could not be resolved: {}",
                    request.location.trim(),
                    other
                )),
            })?;

        Ok(SearchParams {
            term,
            location_code: Some(location.code),
            location_name: location.name,
            radius_km: request.radius_km,
            min_price: request.min_price,
            max_price: request.max_price,
            custom_link: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Listing, ResolvedLocation};
    use crate::storage::{NoveltyStore, QueryRegistry, SqliteStorage};
    use async_trait::async_trait;

    struct FakeFetcher {
        listings: Vec<Listing>,
        fail_fetch: bool,
    }

    #[async_trait]
    impl ListingFetcher for FakeFetcher {
        async fn fetch(&self, _params: &SearchParams) -> Result<Vec<Listing>> {
            if self.fail_fetch {
                return Err(AppError::fetch("search", "HTTP 503"));
            }
            Ok(self.listings.clone())
        }

        async fn resolve_location(&self, name: &str) -> Result<ResolvedLocation> {
            match name.trim() {
                "Köln" | "Koeln" => Ok(ResolvedLocation {
                    code: 945,
                    name: "Köln".into(),
                }),
                _ => Err(AppError::not_found(format!("location '{name}'"))),
            }
        }
    }

    fn listing(id: &str) -> Listing {
        Listing {
            id: id.into(),
            title: format!("Listing {id}"),
            price: "50 €".into(),
            link: format!("https://example.com/{id}"),
            location: "Köln".into(),
        }
    }

    fn request(term: &str, location: &str, radius_km: u32) -> QueryRequest {
        QueryRequest {
            term: term.into(),
            location: location.into(),
            radius_km,
            ..QueryRequest::default()
        }
    }

    fn service(fail_fetch: bool) -> (QueryService, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let fetcher = Arc::new(FakeFetcher {
            listings: vec![listing("A"), listing("B")],
            fail_fetch,
        });
        (QueryService::new(storage.clone(), fetcher, 200), storage)
    }

    #[tokio::test]
    async fn test_create_records_baseline() {
        let (service, storage) = service(false);
        let query = service
            .create_query(request("bike", "Koeln", 20), 7)
            .await
            .unwrap();

        assert_eq!(query.owner, 7);
        assert_eq!(query.params.location_code, Some(945));
        assert_eq!(query.params.location_name, "Köln");

        let seen = storage.list_seen(query.id).await.unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_location_is_validation_error() {
        let (service, storage) = service(false);
        let err = service
            .create_query(request("bike", "Atlantis", 20), 7)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(storage.list_queries(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let (service, _) = service(false);

        let err = service.create_query(request("  ", "Köln", 20), 7).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let err = service.create_query(request("bike", "Köln", 500), 7).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let mut inverted = request("bike", "Köln", 20);
        inverted.min_price = Some(100);
        inverted.max_price = Some(50);
        let err = service.create_query(inverted, 7).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let mut ftp = request("bike", "", 0);
        ftp.custom_link = Some("ftp://example.com/list".into());
        let err = service.create_query(ftp, 7).await;
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failed_baseline_stores_nothing() {
        let (service, storage) = service(true);
        let err = service
            .create_query(request("bike", "Köln", 20), 7)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Fetch { .. }));
        assert!(storage.list_all_queries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_link_skips_location_lookup() {
        let (service, _) = service(false);
        let mut req = request("lamp", "", 0);
        req.custom_link = Some("https://www.kleinanzeigen.de/s-lampe/k0".into());

        let query = service.create_query(req, 7).await.unwrap();
        assert_eq!(query.params.location_code, None);
        assert!(query.params.custom_link.is_some());
    }

    #[tokio::test]
    async fn test_delete_checks_owner() {
        let (service, _) = service(false);
        let query = service
            .create_query(request("bike", "Köln", 20), 7)
            .await
            .unwrap();

        let err = service.delete_query(query.id, 8).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let deleted = service.delete_query(query.id, 7).await.unwrap();
        assert_eq!(deleted.id, query.id);
        assert!(service.list_queries(7).await.unwrap().is_empty());
    }
}
