//! Periodic polling of saved queries.
//!
//! Every tick lists all queries and polls them with bounded concurrency.
//! The bound is shared by all cycles, so a slow cycle overlapping the next
//! one never raises the number of fetches in flight.
//! Each poll follows a two-strike failure policy:
//!
//! ```text
//! OK     --fetch fails-->     FAILED   (persist, warn owner)
//! FAILED --fetch fails-->     removed  (delete, tell owner)
//! FAILED --fetch succeeds-->  OK       (persist, then normal flow)
//! OK     --fetch succeeds-->  OK       (record new listings, notify)
//! ```
//!
//! New listings are recorded before they are sent, so a crash can lose a
//! notification but never repeat one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;

use crate::error::{AppError, Result};
use crate::models::{Listing, Message, Messages, Query, SchedulerConfig};
use crate::services::{ListingFetcher, Notifier};
use crate::storage::Storage;

/// Result of polling one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll of the same query was still running, or the query is gone
    Skipped,
    /// Fetch succeeded, nothing new
    Unchanged,
    /// Fetch succeeded, this many new listings were sent
    Notified(usize),
    /// First failed fetch, query marked as failed
    Degraded,
    /// Second failed fetch in a row, query deleted
    Removed,
    /// Owner unreachable, this many of their queries were deleted
    RecipientGone(usize),
    /// The store failed; nothing was sent
    StorageFailed,
}

/// Per-outcome counters of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub queries: usize,
    pub skipped: usize,
    pub unchanged: usize,
    pub notified_queries: usize,
    pub listings_sent: usize,
    pub degraded: usize,
    pub removed: usize,
    pub recipients_gone: usize,
    pub storage_failures: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Skipped => self.skipped += 1,
            PollOutcome::Unchanged => self.unchanged += 1,
            PollOutcome::Notified(n) => {
                self.notified_queries += 1;
                self.listings_sent += n;
            }
            PollOutcome::Degraded => self.degraded += 1,
            PollOutcome::Removed => self.removed += 1,
            PollOutcome::RecipientGone(_) => self.recipients_gone += 1,
            PollOutcome::StorageFailed => self.storage_failures += 1,
        }
    }
}

/// Set of query IDs with a poll in progress.
#[derive(Debug, Default)]
struct InFlight {
    ids: Mutex<HashSet<i64>>,
}

impl InFlight {
    /// Claim `id`; `None` if it is already claimed.
    fn try_acquire(&self, id: i64) -> Option<InFlightGuard<'_>> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.insert(id).then(|| InFlightGuard { owner: self, id })
    }
}

/// Releases the claim on drop.
struct InFlightGuard<'a> {
    owner: &'a InFlight,
    id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Polls every saved query on a fixed interval.
pub struct PollScheduler {
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn ListingFetcher>,
    notifier: Arc<dyn Notifier>,
    messages: Arc<Messages>,
    config: SchedulerConfig,
    fetch_timeout: Duration,
    in_flight: InFlight,
    permits: Semaphore,
}

impl PollScheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn ListingFetcher>,
        notifier: Arc<dyn Notifier>,
        messages: Arc<Messages>,
        config: SchedulerConfig,
        fetch_timeout: Duration,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_polls.max(1));
        Self {
            storage,
            fetcher,
            notifier,
            messages,
            config,
            fetch_timeout,
            in_flight: InFlight::default(),
            permits,
        }
    }

    /// Tick forever, spawning one cycle per tick.
    ///
    /// A slow cycle never delays the next tick. Queries still being polled
    /// are skipped by the next cycle, and all cycles draw from the same
    /// `max_concurrent_polls` permits.
    pub async fn run(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "Polling every {}s with up to {} concurrent queries",
            period.as_secs(),
            self.config.max_concurrent_polls
        );

        loop {
            ticker.tick().await;
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = scheduler.run_cycle().await {
                    log::error!("Poll cycle failed: {}", e);
                }
            });
        }
    }

    /// Poll all queries once.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let ids: Vec<i64> = self
            .storage
            .list_all_queries()
            .await?
            .into_iter()
            .map(|q| q.id)
            .collect();
        let concurrency = self.config.max_concurrent_polls.max(1);

        let outcomes: Vec<PollOutcome> = stream::iter(ids.iter().copied())
            .map(|id| self.poll_query(id))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = CycleReport {
            queries: ids.len(),
            ..CycleReport::default()
        };
        for outcome in outcomes {
            report.record(outcome);
        }

        if report.queries > 0 {
            log::info!(
                "Poll cycle: {} queries, {} listings sent, {} degraded, {} removed, {} skipped",
                report.queries,
                report.listings_sent,
                report.degraded,
                report.removed,
                report.skipped
            );
        }
        Ok(report)
    }

    /// Poll one query.
    ///
    /// The query is re-read after claiming it so the failure flag is never
    /// stale.
    pub async fn poll_query(&self, query_id: i64) -> PollOutcome {
        let Some(_guard) = self.in_flight.try_acquire(query_id) else {
            log::debug!("Query {} is still being polled, skipping", query_id);
            return PollOutcome::Skipped;
        };
        // Never closed
        let Ok(_permit) = self.permits.acquire().await else {
            return PollOutcome::Skipped;
        };

        let query = match self.storage.get_query(query_id).await {
            Ok(Some(query)) => query,
            Ok(None) => return PollOutcome::Skipped,
            Err(e) => {
                log::error!("Loading query {} failed: {}", query_id, e);
                return PollOutcome::StorageFailed;
            }
        };

        match self.fetch(&query).await {
            Ok(listings) => self.on_success(&query, listings).await,
            Err(e) => {
                log::warn!("Fetch for query {} {} failed: {}", query.id, query.params.label(), e);
                self.on_failure(&query).await
            }
        }
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<Listing>> {
        tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&query.params))
            .await
            .map_err(|_| {
                AppError::fetch(
                    query.params.label(),
                    format!("timed out after {:?}", self.fetch_timeout),
                )
            })?
    }

    async fn on_success(&self, query: &Query, listings: Vec<Listing>) -> PollOutcome {
        if query.failed_previously {
            match self.storage.set_failure_state(query.id, false).await {
                Ok(true) => log::info!("Query {} recovered", query.id),
                Ok(false) => return PollOutcome::Skipped,
                Err(e) => {
                    log::error!("Clearing failure state of query {} failed: {}", query.id, e);
                    return PollOutcome::StorageFailed;
                }
            }
        }

        let novel = match self
            .storage
            .record_novel(query.id, &listings, Utc::now())
            .await
        {
            Ok(novel) => novel,
            Err(e) => {
                log::error!("Recording listings of query {} failed: {}", query.id, e);
                return PollOutcome::StorageFailed;
            }
        };

        if novel.is_empty() {
            return PollOutcome::Unchanged;
        }

        log::info!("Query {}: {} new listings", query.id, novel.len());
        for listing in &novel {
            let message = self.messages.new_listing(listing, query);
            if let Err(outcome) = self.notify_owner(query.owner, &message).await {
                return outcome;
            }
        }
        PollOutcome::Notified(novel.len())
    }

    async fn on_failure(&self, query: &Query) -> PollOutcome {
        if !query.failed_previously {
            match self.storage.set_failure_state(query.id, true).await {
                Ok(true) => {}
                // Deleted while its fetch was running
                Ok(false) => return PollOutcome::Skipped,
                Err(e) => {
                    log::error!("Persisting failure of query {} failed: {}", query.id, e);
                    return PollOutcome::StorageFailed;
                }
            }
            let message = self.messages.fetch_warning(query);
            return match self.notify_owner(query.owner, &message).await {
                Ok(()) => PollOutcome::Degraded,
                Err(outcome) => outcome,
            };
        }

        match self.storage.delete_query(query.id, query.owner).await {
            Ok(Some(_)) => {}
            Ok(None) => return PollOutcome::Skipped,
            Err(e) => {
                log::error!("Deleting query {} failed: {}", query.id, e);
                return PollOutcome::StorageFailed;
            }
        }
        log::info!(
            "Query {} removed after two consecutive failed fetches",
            query.id
        );

        let message = self.messages.query_removed(query);
        match self.notify_owner(query.owner, &message).await {
            Ok(()) => PollOutcome::Removed,
            Err(outcome) => outcome,
        }
    }

    /// Send a message; `Err` carries the outcome that ends the poll.
    ///
    /// An unreachable owner loses all their queries. Other delivery errors
    /// are only logged.
    async fn notify_owner(
        &self,
        owner: i64,
        message: &Message,
    ) -> std::result::Result<(), PollOutcome> {
        let err = match self.notifier.notify(owner, message).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if !err.is_recipient_unreachable() {
            log::warn!("Notifying {} failed: {}", owner, err);
            return Ok(());
        }

        match self.storage.delete_queries_for(owner).await {
            Ok(deleted) => {
                log::info!(
                    "Recipient {} is unreachable, deleted {} queries",
                    owner,
                    deleted
                );
                Err(PollOutcome::RecipientGone(deleted))
            }
            Err(e) => {
                log::error!("Deleting queries of {} failed: {}", owner, e);
                Err(PollOutcome::StorageFailed)
            }
        }
    }
}
