//! Persistence gateway contract consumed by the sync pipeline.

use async_trait::async_trait;
use chrono::NaiveDate;
use nightcat_core::{CanonicalEvent, RawEvent, ScrapeOutcome, Source};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("canonical event {0} not found")]
    NotFound(Uuid),
    #[error("duplicate raw event key in one batch: {0}/{1}")]
    DuplicateRawKey(Source, String),
}

/// Durable store for raw and canonical events.
///
/// Each call is assumed atomic on its own; nothing here spans a transaction
/// across calls.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Idempotent by `(source, source_id)`. The batch must not contain the
    /// same key twice.
    async fn upsert_raw_events(&self, events: &[RawEvent]) -> Result<usize, StoreError>;

    /// Canonical events for one date, optionally narrowed to an exact venue
    /// name, in insertion order. The linkage engine always passes `None`:
    /// venue spellings differ across sources and are scored fuzzily instead.
    async fn canonical_by_date(
        &self,
        event_date: NaiveDate,
        venue_name: Option<&str>,
    ) -> Result<Vec<CanonicalEvent>, StoreError>;

    async fn upcoming_canonical(&self, from: NaiveDate) -> Result<Vec<CanonicalEvent>, StoreError>;

    /// Inserts when `event.id` is `None`, otherwise updates that row.
    async fn upsert_canonical_event(&self, event: &CanonicalEvent) -> Result<Uuid, StoreError>;

    /// Retention only; the linkage engine never deletes.
    async fn delete_canonical_before(&self, before: NaiveDate) -> Result<usize, StoreError>;

    async fn record_scrape_outcomes(&self, outcomes: &[ScrapeOutcome]) -> Result<(), StoreError>;
}

pub(crate) fn ensure_unique_raw_keys(events: &[RawEvent]) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::with_capacity(events.len());
    for event in events {
        if !seen.insert(event.identity()) {
            return Err(StoreError::DuplicateRawKey(
                event.source,
                event.source_id.clone(),
            ));
        }
    }
    Ok(())
}
