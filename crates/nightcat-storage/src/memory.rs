//! In-process `EventStore` used by tests and embedders without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use nightcat_core::{CanonicalEvent, RawEvent, ScrapeOutcome, Source};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{ensure_unique_raw_keys, EventStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    raw: BTreeMap<(Source, String), RawEvent>,
    canonical: Vec<CanonicalEvent>,
    outcomes: Vec<ScrapeOutcome>,
    canonical_writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    state: Mutex<MemoryState>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raw_events(&self) -> Vec<RawEvent> {
        self.state.lock().await.raw.values().cloned().collect()
    }

    pub async fn canonical_events(&self) -> Vec<CanonicalEvent> {
        self.state.lock().await.canonical.clone()
    }

    pub async fn scrape_outcomes(&self) -> Vec<ScrapeOutcome> {
        self.state.lock().await.outcomes.clone()
    }

    /// Number of canonical insert/update calls served so far.
    pub async fn canonical_writes(&self) -> usize {
        self.state.lock().await.canonical_writes
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn upsert_raw_events(&self, events: &[RawEvent]) -> Result<usize, StoreError> {
        ensure_unique_raw_keys(events)?;
        let mut state = self.state.lock().await;
        for event in events {
            state
                .raw
                .insert((event.source, event.source_id.clone()), event.clone());
        }
        Ok(events.len())
    }

    async fn canonical_by_date(
        &self,
        event_date: NaiveDate,
        venue_name: Option<&str>,
    ) -> Result<Vec<CanonicalEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .canonical
            .iter()
            .filter(|e| e.event_date == event_date)
            .filter(|e| venue_name.is_none() || e.venue_name.as_deref() == venue_name)
            .cloned()
            .collect())
    }

    async fn upcoming_canonical(&self, from: NaiveDate) -> Result<Vec<CanonicalEvent>, StoreError> {
        let state = self.state.lock().await;
        let mut events = state
            .canonical
            .iter()
            .filter(|e| e.event_date >= from)
            .cloned()
            .collect::<Vec<_>>();
        events.sort_by_key(|e| e.event_date);
        Ok(events)
    }

    async fn upsert_canonical_event(&self, event: &CanonicalEvent) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.canonical_writes += 1;

        match event.id {
            None => {
                let id = Uuid::new_v4();
                let mut stored = event.clone();
                stored.id = Some(id);
                stored.created_at = Some(now);
                stored.updated_at = Some(now);
                state.canonical.push(stored);
                Ok(id)
            }
            Some(id) => {
                let slot = state
                    .canonical
                    .iter_mut()
                    .find(|e| e.id == Some(id))
                    .ok_or(StoreError::NotFound(id))?;
                let created_at = slot.created_at;
                *slot = event.clone();
                slot.created_at = created_at;
                slot.updated_at = Some(now);
                Ok(id)
            }
        }
    }

    async fn delete_canonical_before(&self, before: NaiveDate) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let len_before = state.canonical.len();
        state.canonical.retain(|e| e.event_date >= before);
        Ok(len_before - state.canonical.len())
    }

    async fn record_scrape_outcomes(&self, outcomes: &[ScrapeOutcome]) -> Result<(), StoreError> {
        self.state.lock().await.outcomes.extend_from_slice(outcomes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn canonical(title: &str, d: u32, venue: Option<&str>) -> CanonicalEvent {
        CanonicalEvent {
            id: None,
            title: title.to_string(),
            event_date: date(d),
            start_time: None,
            end_time: None,
            venue_name: venue.map(String::from),
            venue_address: None,
            artists: vec![],
            cost_display: None,
            price_min_cents: None,
            price_max_cents: None,
            source_urls: BTreeMap::new(),
            sources: vec![Source::Ra],
            attending_count: None,
            description: None,
            image_url: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn raw_upsert_overwrites_by_identity() {
        let store = MemoryEventStore::new();
        let mut first = RawEvent::new(Source::Dice, "abc", "Old Title", date(14));
        store.upsert_raw_events(&[first.clone()]).await.unwrap();
        first.title = "New Title".into();
        store.upsert_raw_events(&[first]).await.unwrap();

        let raw = store.raw_events().await;
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].title, "New Title");
    }

    #[tokio::test]
    async fn raw_upsert_rejects_in_batch_duplicates() {
        let store = MemoryEventStore::new();
        let a = RawEvent::new(Source::Dice, "abc", "A", date(14));
        let err = store.upsert_raw_events(&[a.clone(), a]).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRawKey(Source::Dice, ref id) if id == "abc"));
        assert!(store.raw_events().await.is_empty());
    }

    #[tokio::test]
    async fn canonical_insert_assigns_id_and_update_keeps_it() {
        let store = MemoryEventStore::new();
        let id = store
            .upsert_canonical_event(&canonical("Night", 14, Some("Elsewhere")))
            .await
            .unwrap();

        let mut stored = store.canonical_by_date(date(14), None).await.unwrap().remove(0);
        assert_eq!(stored.id, Some(id));
        let created_at = stored.created_at;
        assert!(created_at.is_some());

        stored.description = Some("updated".into());
        let same = store.upsert_canonical_event(&stored).await.unwrap();
        assert_eq!(same, id);

        let all = store.canonical_events().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description.as_deref(), Some("updated"));
        assert_eq!(all[0].created_at, created_at);
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let store = MemoryEventStore::new();
        let mut event = canonical("Ghost", 14, None);
        let id = Uuid::new_v4();
        event.id = Some(id);
        let err = store.upsert_canonical_event(&event).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn date_and_venue_filters_apply() {
        let store = MemoryEventStore::new();
        store.upsert_canonical_event(&canonical("A", 14, Some("Elsewhere"))).await.unwrap();
        store.upsert_canonical_event(&canonical("B", 14, Some("Nowadays"))).await.unwrap();
        store.upsert_canonical_event(&canonical("C", 15, Some("Elsewhere"))).await.unwrap();

        assert_eq!(store.canonical_by_date(date(14), None).await.unwrap().len(), 2);
        let at_venue = store
            .canonical_by_date(date(14), Some("Nowadays"))
            .await
            .unwrap();
        assert_eq!(at_venue.len(), 1);
        assert_eq!(at_venue[0].title, "B");
    }

    #[tokio::test]
    async fn retention_deletes_only_past_dates() {
        let store = MemoryEventStore::new();
        store.upsert_canonical_event(&canonical("Past", 10, None)).await.unwrap();
        store.upsert_canonical_event(&canonical("Today", 14, None)).await.unwrap();
        store.upsert_canonical_event(&canonical("Future", 20, None)).await.unwrap();

        assert_eq!(store.delete_canonical_before(date(14)).await.unwrap(), 1);
        let upcoming = store.upcoming_canonical(date(1)).await.unwrap();
        let titles = upcoming.iter().map(|e| e.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Today", "Future"]);
    }
}
