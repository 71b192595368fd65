//! Source adapter contract and the per-source adapter implementations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use nightcat_core::{RawEvent, Source};
use nightcat_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod basement;
pub mod dice;
pub mod lightandsound;
pub mod nycnoise;
pub mod partiful;
pub mod ra;

pub use basement::BasementAdapter;
pub use dice::DiceAdapter;
pub use lightandsound::LightAndSoundAdapter;
pub use nycnoise::NycNoiseAdapter;
pub use partiful::PartifulAdapter;
pub use ra::RaAdapter;

pub const CRATE_NAME: &str = "nightcat-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Parse(String),
}

/// One upstream source's listing scraper.
///
/// `scrape` returns every listing it could parse; listings without a usable
/// date are dropped rather than failing the batch.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn scrape(&self) -> Result<Vec<RawEvent>, AdapterError>;
}

/// Per-source overrides loaded from the source registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterSettings {
    /// Replaces the source's default listing URLs when non-empty.
    pub listing_urls: Vec<String>,
    /// Geographic area filter; only the GraphQL source uses it.
    pub area: Option<u32>,
}

impl AdapterSettings {
    fn urls_or_default(&self, source: Source) -> Vec<String> {
        if self.listing_urls.is_empty() {
            default_listing_urls(source)
        } else {
            self.listing_urls.clone()
        }
    }
}

pub fn default_listing_urls(source: Source) -> Vec<String> {
    match source {
        Source::Ra => vec![ra::GRAPHQL_URL.to_string()],
        Source::Dice => dice::CATEGORIES
            .iter()
            .map(|cat| format!("{}/{cat}", dice::BROWSE_URL))
            .collect(),
        Source::Partiful => vec![partiful::DISCOVER_URL.to_string()],
        Source::Basement => vec![basement::API_URL.to_string()],
        Source::LightAndSound => vec![lightandsound::BASE_URL.to_string()],
        Source::NycNoise => vec![nycnoise::BASE_URL.to_string()],
    }
}

pub fn adapter_for_source(
    source: Source,
    settings: &AdapterSettings,
    http: HttpFetcher,
) -> Box<dyn SourceAdapter> {
    let urls = settings.urls_or_default(source);
    match source {
        Source::Ra => Box::new(RaAdapter::new(
            http,
            urls.into_iter().next().unwrap_or_else(|| ra::GRAPHQL_URL.to_string()),
            settings.area.unwrap_or(ra::DEFAULT_AREA_ID),
        )),
        Source::Dice => Box::new(DiceAdapter::new(http, urls)),
        Source::Partiful => Box::new(PartifulAdapter::new(http, urls)),
        Source::Basement => Box::new(BasementAdapter::new(http, urls)),
        Source::LightAndSound => Box::new(LightAndSoundAdapter::new(
            http,
            urls.into_iter()
                .next()
                .unwrap_or_else(|| lightandsound::BASE_URL.to_string()),
        )),
        Source::NycNoise => Box::new(NycNoiseAdapter::new(
            http,
            urls.into_iter().next().unwrap_or_else(|| nycnoise::BASE_URL.to_string()),
        )),
    }
}

pub(crate) fn text_or_none(value: impl AsRef<str>) -> Option<String> {
    let trimmed = value.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Parse(format!("bad selector {css}: {e}")))
}

/// Element text with each text node trimmed and joined by single spaces.
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str().filter(|s| !s.is_empty())
}

pub(crate) fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    let v = json_at(value, path)?;
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

pub(crate) fn json_array<'a>(value: &'a JsonValue, path: &[&str]) -> &'a [JsonValue] {
    json_at(value, path)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Upstream ids arrive as strings or numbers.
pub(crate) fn json_id(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls the server-rendered `__NEXT_DATA__` JSON blob out of a page.
pub(crate) fn extract_next_data(html: &str) -> Option<JsonValue> {
    let document = Html::parse_document(html);
    let sel = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = document.select(&sel).next()?;
    let text = script.text().collect::<String>();
    serde_json::from_str(&text).ok()
}

/// ISO-8601 date-time, keeping the wall-clock of whatever offset it carries.
pub(crate) fn parse_iso_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    None
}

pub(crate) fn parse_iso_date_prefix(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Bare `HH:MM[:SS]` or the time part of a full date-time.
pub(crate) fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    for fmt in ["%H:%M:%S%.f", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(raw, fmt) {
            return Some(t);
        }
    }
    parse_iso_datetime(raw).map(|dt| dt.time())
}
