//! Core domain model for the nightcat event catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod normalize;

pub const CRATE_NAME: &str = "nightcat-core";

/// Upstream listing sources known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "ra")]
    Ra,
    #[serde(rename = "dice")]
    Dice,
    #[serde(rename = "partiful")]
    Partiful,
    #[serde(rename = "basement")]
    Basement,
    #[serde(rename = "lightandsound")]
    LightAndSound,
    #[serde(rename = "nycnoise")]
    NycNoise,
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::Ra,
        Source::Dice,
        Source::Partiful,
        Source::Basement,
        Source::LightAndSound,
        Source::NycNoise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ra => "ra",
            Source::Dice => "dice",
            Source::Partiful => "partiful",
            Source::Basement => "basement",
            Source::LightAndSound => "lightandsound",
            Source::NycNoise => "nycnoise",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == s.trim())
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// One source's as-scraped view of a listing, before cross-source dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub event_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    /// Display lineup; entries may be compound ("A b2b B").
    pub artists: Vec<String>,
    pub cost_display: Option<String>,
    pub price_min_cents: Option<i64>,
    pub price_max_cents: Option<i64>,
    pub source_url: Option<String>,
    pub attending_count: Option<i64>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawEvent {
    pub fn new(
        source: Source,
        source_id: impl Into<String>,
        title: impl Into<String>,
        event_date: NaiveDate,
    ) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            title: title.into(),
            event_date,
            start_time: None,
            end_time: None,
            venue_name: None,
            venue_address: None,
            artists: Vec::new(),
            cost_display: None,
            price_min_cents: None,
            price_max_cents: None,
            source_url: None,
            attending_count: None,
            description: None,
            image_url: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Storage identity; unique per source.
    pub fn identity(&self) -> (Source, &str) {
        (self.source, self.source_id.as_str())
    }
}

/// Deduplicated, user-facing event backed by one or more raw events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: Option<Uuid>,
    pub title: String,
    pub event_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub artists: Vec<String>,
    pub cost_display: Option<String>,
    pub price_min_cents: Option<i64>,
    pub price_max_cents: Option<i64>,
    pub source_urls: BTreeMap<Source, String>,
    pub sources: Vec<Source>,
    pub attending_count: Option<i64>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Exact-match lookup key: normalized title, date, normalized venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComparisonKey {
    pub title: String,
    pub event_date: NaiveDate,
    pub venue: String,
}

impl ComparisonKey {
    fn build(title: &str, event_date: NaiveDate, venue: Option<&str>) -> Self {
        Self {
            title: normalize::normalize(title),
            event_date,
            venue: normalize::normalize_venue(venue.unwrap_or_default()),
        }
    }

    pub fn for_raw(event: &RawEvent) -> Self {
        Self::build(&event.title, event.event_date, event.venue_name.as_deref())
    }

    pub fn for_canonical(event: &CanonicalEvent) -> Self {
        Self::build(&event.title, event.event_date, event.venue_name.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Success,
    Error,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Success => "success",
            ScrapeStatus::Error => "error",
        }
    }
}

/// Per-source result of one harness run, kept for scrape-health monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub source: Source,
    pub status: ScrapeStatus,
    pub event_count: usize,
    pub duration: Duration,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ScrapeOutcome {
    pub fn success(source: Source, event_count: usize, duration: Duration) -> Self {
        Self {
            source,
            status: ScrapeStatus::Success,
            event_count,
            duration,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(source: Source, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            source,
            status: ScrapeStatus::Error,
            event_count: 0,
            duration,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}
