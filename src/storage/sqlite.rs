//! SQLite storage implementation.
//!
//! A single connection guarded by a mutex. Every call runs on the blocking
//! thread pool so the async workers never wait on disk I/O.
//!
//! ## Features
//!
//! - **Idempotent schema**: `sql/001_schema.sql` is applied on every open
//! - **WAL journal** for file databases
//! - **Foreign keys** enabled so deleting a query removes its seen listings

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{AppError, Result};
use crate::models::{Listing, Query, SearchParams, SeenListing};
use crate::storage::{NoveltyStore, QueryRegistry};

const SCHEMA: &str = include_str!("../../sql/001_schema.sql");

const QUERY_COLUMNS: &str = "id, owner, term, location_code, location_name, radius_km, \
                             min_price, max_price, custom_link, failed_previously, created_at";

const INSERT_SEEN: &str = "INSERT OR IGNORE INTO seen_listings \
                           (query_id, listing_id, location, first_seen_at) VALUES (?1, ?2, ?3, ?4)";

/// SQLite-backed query registry and novelty store.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        log::info!("Opened database at {}", path.display());
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::storage("connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await?
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn non_empty(text: &str) -> Option<&str> {
    if text.is_empty() { None } else { Some(text) }
}

fn query_from_row(row: &Row<'_>) -> rusqlite::Result<Query> {
    Ok(Query {
        id: row.get(0)?,
        owner: row.get(1)?,
        params: SearchParams {
            term: row.get(2)?,
            location_code: row.get(3)?,
            location_name: row.get(4)?,
            radius_km: row.get(5)?,
            min_price: row.get(6)?,
            max_price: row.get(7)?,
            custom_link: row.get(8)?,
        },
        failed_previously: row.get(9)?,
        created_at: from_unix(row.get(10)?),
    })
}

fn select_query(conn: &Connection, id: i64) -> rusqlite::Result<Option<Query>> {
    conn.query_row(
        &format!("SELECT {QUERY_COLUMNS} FROM queries WHERE id = ?1"),
        [id],
        query_from_row,
    )
    .optional()
}

/// Insert listings with `INSERT OR IGNORE`, returning those actually inserted.
fn insert_seen(
    conn: &Connection,
    query_id: i64,
    listings: Vec<Listing>,
    seen_at: i64,
) -> rusqlite::Result<Vec<Listing>> {
    let mut stmt = conn.prepare_cached(INSERT_SEEN)?;
    let mut inserted = Vec::new();
    for listing in listings {
        let changed = stmt.execute(params![
            query_id,
            listing.id,
            non_empty(&listing.location),
            seen_at
        ])?;
        if changed == 1 {
            inserted.push(listing);
        }
    }
    Ok(inserted)
}

#[async_trait]
impl NoveltyStore for SqliteStorage {
    async fn record_seen(
        &self,
        query_id: i64,
        listings: &[Listing],
        seen_at: DateTime<Utc>,
    ) -> Result<usize> {
        let listings = listings.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let inserted = insert_seen(&tx, query_id, listings, seen_at.timestamp())?;
            tx.commit()?;
            Ok(inserted.len())
        })
        .await
    }

    async fn diff_against_known(
        &self,
        query_id: i64,
        candidates: &[Listing],
    ) -> Result<Vec<Listing>> {
        let candidates = candidates.to_vec();
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT EXISTS(SELECT 1 FROM seen_listings WHERE query_id = ?1 AND listing_id = ?2)",
            )?;
            let mut reported = HashSet::new();
            let mut novel = Vec::new();
            for listing in candidates {
                if reported.contains(&listing.id) {
                    continue;
                }
                let known: bool = stmt.query_row(params![query_id, listing.id], |r| r.get(0))?;
                if !known {
                    reported.insert(listing.id.clone());
                    novel.push(listing);
                }
            }
            Ok(novel)
        })
        .await
    }

    async fn record_novel(
        &self,
        query_id: i64,
        candidates: &[Listing],
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<Listing>> {
        let candidates = candidates.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM queries WHERE id = ?1)",
                [query_id],
                |r| r.get(0),
            )?;
            if !exists {
                return Ok(Vec::new());
            }
            let novel = insert_seen(&tx, query_id, candidates, seen_at.timestamp())?;
            tx.commit()?;
            Ok(novel)
        })
        .await
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM seen_listings WHERE first_seen_at < ?1",
                [cutoff.timestamp()],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn list_seen(&self, query_id: i64) -> Result<Vec<SeenListing>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT query_id, listing_id, location, first_seen_at FROM seen_listings \
                 WHERE query_id = ?1 ORDER BY first_seen_at, listing_id",
            )?;
            let rows = stmt.query_map([query_id], |row| {
                Ok(SeenListing {
                    query_id: row.get(0)?,
                    listing_id: row.get(1)?,
                    location: row.get(2)?,
                    first_seen_at: from_unix(row.get(3)?),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[async_trait]
impl QueryRegistry for SqliteStorage {
    async fn insert_query(
        &self,
        owner: i64,
        params: &SearchParams,
        baseline: &[Listing],
        now: DateTime<Utc>,
    ) -> Result<Query> {
        let params = params.clone();
        let baseline = baseline.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO queries (owner, term, location_code, location_name, radius_km, \
                 min_price, max_price, custom_link, failed_previously, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
                params![
                    owner,
                    params.term,
                    params.location_code,
                    params.location_name,
                    params.radius_km,
                    params.min_price,
                    params.max_price,
                    params.custom_link,
                    now.timestamp()
                ],
            )?;
            let id = tx.last_insert_rowid();
            let recorded = insert_seen(&tx, id, baseline, now.timestamp())?;
            tx.commit()?;

            log::debug!(
                "Stored query {} for owner {} with {} baseline listings",
                id,
                owner,
                recorded.len()
            );

            Ok(Query {
                id,
                owner,
                params,
                failed_previously: false,
                created_at: from_unix(now.timestamp()),
            })
        })
        .await
    }

    async fn get_query(&self, id: i64) -> Result<Option<Query>> {
        self.call(move |conn| Ok(select_query(conn, id)?)).await
    }

    async fn list_queries(&self, owner: i64) -> Result<Vec<Query>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {QUERY_COLUMNS} FROM queries WHERE owner = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map([owner], query_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn list_all_queries(&self) -> Result<Vec<Query>> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {QUERY_COLUMNS} FROM queries"))?;
            let rows = stmt.query_map([], query_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn delete_query(&self, id: i64, owner: i64) -> Result<Option<Query>> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let query = match select_query(&tx, id)? {
                Some(query) if query.owner == owner => query,
                _ => return Ok(None),
            };
            tx.execute("DELETE FROM queries WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(Some(query))
        })
        .await
    }

    async fn delete_queries_for(&self, owner: i64) -> Result<usize> {
        self.call(move |conn| Ok(conn.execute("DELETE FROM queries WHERE owner = ?1", [owner])?))
            .await
    }

    async fn set_failure_state(&self, id: i64, failed: bool) -> Result<bool> {
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE queries SET failed_previously = ?2 WHERE id = ?1",
                params![id, failed],
            )?;
            Ok(updated > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn listing(id: &str) -> Listing {
        Listing {
            id: id.to_string(),
            title: format!("Listing {id}"),
            price: "10 €".to_string(),
            link: format!("https://example.com/{id}"),
            location: "50667 Köln".to_string(),
        }
    }

    fn params(term: &str) -> SearchParams {
        SearchParams {
            term: term.to_string(),
            location_code: Some(945),
            location_name: "Köln".to_string(),
            radius_km: 20,
            ..SearchParams::default()
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_query() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();
        let created = storage
            .insert_query(7, &params("bike"), &[], now)
            .await
            .unwrap();

        let loaded = storage.get_query(created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.params.location_code, Some(945));
        assert!(!loaded.failed_previously);
    }

    #[tokio::test]
    async fn test_record_seen_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let query = storage
            .insert_query(1, &params("bike"), &[], Utc::now())
            .await
            .unwrap();
        let batch = vec![listing("a")];

        assert_eq!(storage.record_seen(query.id, &batch, Utc::now()).await.unwrap(), 1);
        assert_eq!(storage.record_seen(query.id, &batch, Utc::now()).await.unwrap(), 0);
        assert_eq!(storage.list_seen(query.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_diff_returns_unknown_only() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let query = storage
            .insert_query(1, &params("bike"), &[listing("a"), listing("b")], Utc::now())
            .await
            .unwrap();

        let current = vec![listing("c"), listing("b"), listing("d"), listing("c")];
        let novel = storage.diff_against_known(query.id, &current).await.unwrap();
        let ids: Vec<_> = novel.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_diff_is_per_query() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let first = storage
            .insert_query(1, &params("bike"), &[listing("a")], Utc::now())
            .await
            .unwrap();
        let second = storage
            .insert_query(1, &params("lamp"), &[], Utc::now())
            .await
            .unwrap();

        assert!(storage.diff_against_known(first.id, &[listing("a")]).await.unwrap().is_empty());
        assert_eq!(
            storage.diff_against_known(second.id, &[listing("a")]).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_record_novel_reports_each_listing_once() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let query = storage
            .insert_query(1, &params("bike"), &[listing("a")], Utc::now())
            .await
            .unwrap();

        let novel = storage
            .record_novel(query.id, &[listing("a"), listing("b")], Utc::now())
            .await
            .unwrap();
        assert_eq!(novel, vec![listing("b")]);

        let again = storage
            .record_novel(query.id, &[listing("a"), listing("b")], Utc::now())
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_record_novel_for_deleted_query() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let novel = storage
            .record_novel(42, &[listing("a")], Utc::now())
            .await
            .unwrap();
        assert!(novel.is_empty());
    }

    #[tokio::test]
    async fn test_prune_respects_cutoff() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();
        let query = storage
            .insert_query(1, &params("bike"), &[], now)
            .await
            .unwrap();
        storage
            .record_seen(query.id, &[listing("old")], now - ChronoDuration::days(8))
            .await
            .unwrap();
        storage
            .record_seen(query.id, &[listing("recent")], now - ChronoDuration::days(6))
            .await
            .unwrap();

        let deleted = storage
            .prune_older_than(now - ChronoDuration::days(7))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = storage.list_seen(query.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].listing_id, "recent");
        assert_eq!(remaining[0].location.as_deref(), Some("50667 Köln"));
    }

    #[tokio::test]
    async fn test_delete_requires_owner_and_cascades() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let query = storage
            .insert_query(1, &params("bike"), &[listing("a"), listing("b")], Utc::now())
            .await
            .unwrap();

        assert!(storage.delete_query(query.id, 2).await.unwrap().is_none());
        assert!(storage.get_query(query.id).await.unwrap().is_some());

        let deleted = storage.delete_query(query.id, 1).await.unwrap().unwrap();
        assert_eq!(deleted.id, query.id);
        assert!(storage.get_query(query.id).await.unwrap().is_none());
        assert!(storage.list_seen(query.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_queries_for_owner() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for term in ["a", "b", "c"] {
            storage
                .insert_query(1, &params(term), &[], Utc::now())
                .await
                .unwrap();
        }
        storage
            .insert_query(2, &params("d"), &[], Utc::now())
            .await
            .unwrap();

        assert_eq!(storage.delete_queries_for(1).await.unwrap(), 3);
        assert!(storage.list_queries(1).await.unwrap().is_empty());
        assert_eq!(storage.list_all_queries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_failure_state() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let query = storage
            .insert_query(1, &params("bike"), &[], Utc::now())
            .await
            .unwrap();

        assert!(storage.set_failure_state(query.id, true).await.unwrap());
        assert!(storage.set_failure_state(query.id, true).await.unwrap());
        assert!(storage.get_query(query.id).await.unwrap().unwrap().failed_previously);

        assert!(storage.set_failure_state(query.id, false).await.unwrap());
        assert!(!storage.get_query(query.id).await.unwrap().unwrap().failed_previously);
    }

    #[tokio::test]
    async fn test_set_failure_state_of_deleted_query() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let query = storage
            .insert_query(1, &params("bike"), &[], Utc::now())
            .await
            .unwrap();
        storage.delete_query(query.id, 1).await.unwrap();

        assert!(!storage.set_failure_state(query.id, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_queries_ordered_by_id() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let first = storage.insert_query(5, &params("x"), &[], Utc::now()).await.unwrap();
        let second = storage.insert_query(5, &params("y"), &[], Utc::now()).await.unwrap();

        let ids: Vec<_> = storage
            .list_queries(5)
            .await
            .unwrap()
            .iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_seen_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db").join("alert.db");

        let query_id = {
            let storage = SqliteStorage::open(&path).unwrap();
            storage
                .insert_query(1, &params("bike"), &[listing("a")], Utc::now())
                .await
                .unwrap()
                .id
        };

        let reopened = SqliteStorage::open(&path).unwrap();
        let novel = reopened
            .diff_against_known(query_id, &[listing("a"), listing("b")])
            .await
            .unwrap();
        assert_eq!(novel, vec![listing("b")]);
    }
}
