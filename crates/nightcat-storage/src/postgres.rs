//! Postgres-backed `EventStore` (sqlx runtime queries).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use nightcat_core::{CanonicalEvent, RawEvent, ScrapeOutcome, Source};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::store::{ensure_unique_raw_keys, EventStore, StoreError};

const CANONICAL_COLUMNS: &str = "id, title, event_date, start_time, end_time, venue_name, venue_address, \
     artists, cost_display, price_min_cents, price_max_cents, source_urls, sources, \
     attending_count, description, image_url, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn canonical_from_row(row: &PgRow) -> Result<CanonicalEvent, StoreError> {
    let Json(artists): Json<Vec<String>> = row.try_get("artists")?;
    let Json(source_urls): Json<BTreeMap<Source, String>> = row.try_get("source_urls")?;
    let Json(sources): Json<Vec<Source>> = row.try_get("sources")?;
    Ok(CanonicalEvent {
        id: Some(row.try_get("id")?),
        title: row.try_get("title")?,
        event_date: row.try_get("event_date")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        venue_name: row.try_get("venue_name")?,
        venue_address: row.try_get("venue_address")?,
        artists,
        cost_display: row.try_get("cost_display")?,
        price_min_cents: row.try_get("price_min_cents")?,
        price_max_cents: row.try_get("price_max_cents")?,
        source_urls,
        sources,
        attending_count: row.try_get("attending_count")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        created_at: Some(row.try_get("created_at")?),
        updated_at: Some(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn upsert_raw_events(&self, events: &[RawEvent]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }
        ensure_unique_raw_keys(events)?;

        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;
        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO raw_events (
                    source, source_id, title, event_date, start_time, end_time,
                    venue_name, venue_address, artists, cost_display,
                    price_min_cents, price_max_cents, source_url, attending_count,
                    description, image_url, extra, scraped_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, NOW())
                ON CONFLICT (source, source_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    event_date = EXCLUDED.event_date,
                    start_time = EXCLUDED.start_time,
                    end_time = EXCLUDED.end_time,
                    venue_name = EXCLUDED.venue_name,
                    venue_address = EXCLUDED.venue_address,
                    artists = EXCLUDED.artists,
                    cost_display = EXCLUDED.cost_display,
                    price_min_cents = EXCLUDED.price_min_cents,
                    price_max_cents = EXCLUDED.price_max_cents,
                    source_url = EXCLUDED.source_url,
                    attending_count = EXCLUDED.attending_count,
                    description = EXCLUDED.description,
                    image_url = EXCLUDED.image_url,
                    extra = EXCLUDED.extra,
                    scraped_at = NOW()
                "#,
            )
            .bind(event.source.as_str())
            .bind(&event.source_id)
            .bind(&event.title)
            .bind(event.event_date)
            .bind(event.start_time)
            .bind(event.end_time)
            .bind(&event.venue_name)
            .bind(&event.venue_address)
            .bind(Json(&event.artists))
            .bind(&event.cost_display)
            .bind(event.price_min_cents)
            .bind(event.price_max_cents)
            .bind(&event.source_url)
            .bind(event.attending_count)
            .bind(&event.description)
            .bind(&event.image_url)
            .bind(Json(&event.extra))
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn canonical_by_date(
        &self,
        event_date: NaiveDate,
        venue_name: Option<&str>,
    ) -> Result<Vec<CanonicalEvent>, StoreError> {
        let sql = format!(
            "SELECT {CANONICAL_COLUMNS} FROM events \
             WHERE event_date = $1 AND ($2::text IS NULL OR venue_name = $2) \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(event_date)
            .bind(venue_name)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(canonical_from_row).collect()
    }

    async fn upcoming_canonical(&self, from: NaiveDate) -> Result<Vec<CanonicalEvent>, StoreError> {
        let sql = format!(
            "SELECT {CANONICAL_COLUMNS} FROM events WHERE event_date >= $1 ORDER BY event_date, created_at"
        );
        let rows = sqlx::query(&sql).bind(from).fetch_all(&self.pool).await?;
        rows.iter().map(canonical_from_row).collect()
    }

    async fn upsert_canonical_event(&self, event: &CanonicalEvent) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let (id, is_insert) = match event.id {
            Some(id) => (id, false),
            None => (Uuid::new_v4(), true),
        };

        let sql = if is_insert {
            r#"
            INSERT INTO events (
                id, title, event_date, start_time, end_time, venue_name, venue_address,
                artists, cost_display, price_min_cents, price_max_cents, source_urls,
                sources, attending_count, description, image_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $17)
            "#
        } else {
            r#"
            UPDATE events SET
                title = $2, event_date = $3, start_time = $4, end_time = $5,
                venue_name = $6, venue_address = $7, artists = $8, cost_display = $9,
                price_min_cents = $10, price_max_cents = $11, source_urls = $12,
                sources = $13, attending_count = $14, description = $15,
                image_url = $16, updated_at = $17
            WHERE id = $1
            "#
        };

        let result = sqlx::query(sql)
            .bind(id)
            .bind(&event.title)
            .bind(event.event_date)
            .bind(event.start_time)
            .bind(event.end_time)
            .bind(&event.venue_name)
            .bind(&event.venue_address)
            .bind(Json(&event.artists))
            .bind(&event.cost_display)
            .bind(event.price_min_cents)
            .bind(event.price_max_cents)
            .bind(Json(&event.source_urls))
            .bind(Json(&event.sources))
            .bind(event.attending_count)
            .bind(&event.description)
            .bind(&event.image_url)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if !is_insert && result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(id)
    }

    async fn delete_canonical_before(&self, before: NaiveDate) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM events WHERE event_date < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn record_scrape_outcomes(&self, outcomes: &[ScrapeOutcome]) -> Result<(), StoreError> {
        for outcome in outcomes {
            sqlx::query(
                r#"
                INSERT INTO scrape_logs (source, status, event_count, duration_seconds, error, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(outcome.source.as_str())
            .bind(outcome.status.as_str())
            .bind(outcome.event_count as i64)
            .bind(outcome.duration.as_secs_f64())
            .bind(&outcome.error)
            .bind(outcome.finished_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}
