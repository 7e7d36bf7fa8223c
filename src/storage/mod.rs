//! Storage abstractions for queries and seen listings.
//!
//! Two concerns share one database:
//! - Query Registry: saved searches with their owner and failure state
//! - Novelty Store: every listing ID reported per query, with first-seen time
//!
//! ## Tables
//!
//! ```text
//! queries         1 ──┐
//! seen_listings   N ──┘ ON DELETE CASCADE, unique (query_id, listing_id)
//! ```
//!
//! Both traits are implemented by [`SqliteStorage`]. Consumers hold an
//! `Arc<dyn Storage>` and never touch connections directly.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Listing, Query, SearchParams, SeenListing};

// Re-export for convenience
pub use sqlite::SqliteStorage;

/// Persistent record of listings already reported per query.
#[async_trait]
pub trait NoveltyStore: Send + Sync {
    /// Insert each listing not yet recorded for the query.
    ///
    /// Duplicates are no-ops. Returns the number of rows inserted.
    async fn record_seen(
        &self,
        query_id: i64,
        listings: &[Listing],
        seen_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Return the candidates whose ID is not recorded for the query.
    ///
    /// Candidate order is kept; an ID repeated in `candidates` is returned once.
    async fn diff_against_known(&self, query_id: i64, candidates: &[Listing])
    -> Result<Vec<Listing>>;

    /// Diff and record in one transaction.
    ///
    /// Returns exactly the listings that were inserted. Empty if the query
    /// no longer exists.
    async fn record_novel(
        &self,
        query_id: i64,
        candidates: &[Listing],
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<Listing>>;

    /// Delete every seen record with `first_seen_at < cutoff`, across all queries.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Seen records of one query, oldest first.
    async fn list_seen(&self, query_id: i64) -> Result<Vec<SeenListing>>;
}

/// Persistent record of saved queries.
#[async_trait]
pub trait QueryRegistry: Send + Sync {
    /// Store a new query together with its baseline listings.
    async fn insert_query(
        &self,
        owner: i64,
        params: &SearchParams,
        baseline: &[Listing],
        now: DateTime<Utc>,
    ) -> Result<Query>;

    async fn get_query(&self, id: i64) -> Result<Option<Query>>;

    /// Queries of one owner, ordered by ID.
    async fn list_queries(&self, owner: i64) -> Result<Vec<Query>>;

    /// Every query, for the polling pass.
    async fn list_all_queries(&self) -> Result<Vec<Query>>;

    /// Delete a query if `owner` owns it. Seen records cascade.
    async fn delete_query(&self, id: i64, owner: i64) -> Result<Option<Query>>;

    /// Delete all queries of an owner. Returns how many were deleted.
    async fn delete_queries_for(&self, owner: i64) -> Result<usize>;

    /// Persist whether the last poll of a query failed.
    ///
    /// Returns `false` if the query no longer exists.
    async fn set_failure_state(&self, id: i64, failed: bool) -> Result<bool>;
}

/// Combined handle shared by the scheduler and the command layer.
pub trait Storage: QueryRegistry + NoveltyStore {}

impl<T: QueryRegistry + NoveltyStore> Storage for T {}
