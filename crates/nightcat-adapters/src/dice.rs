use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use nightcat_core::{RawEvent, Source};
use nightcat_storage::HttpFetcher;
use serde_json::Value as JsonValue;

use crate::{
    extract_next_data, json_array, json_i64, json_id, json_str, parse_iso_datetime, AdapterError,
    SourceAdapter,
};

pub const BROWSE_URL: &str = "https://dice.fm/browse/new_york-5bbf4db0f06331478e9b2c59/music";
pub const CATEGORIES: [&str; 3] = ["dj", "party", "gig"];

pub struct DiceAdapter {
    http: HttpFetcher,
    category_urls: Vec<String>,
}

impl DiceAdapter {
    pub fn new(http: HttpFetcher, category_urls: Vec<String>) -> Self {
        Self { http, category_urls }
    }
}

/// Events embedded in one category page; an absent or broken blob yields none.
pub fn parse_category_page(html: &str) -> Vec<RawEvent> {
    let Some(data) = extract_next_data(html) else {
        return Vec::new();
    };
    json_array(&data, &["props", "pageProps", "events"])
        .iter()
        .filter_map(parse_event)
        .collect()
}

fn from_unix(seconds: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.with_timezone(&Local).naive_local())
}

pub fn format_price(cents: i64) -> String {
    if cents == 0 {
        "Free".to_string()
    } else {
        format!("${:.0}", cents as f64 / 100.0)
    }
}

pub fn parse_event(event: &JsonValue) -> Option<RawEvent> {
    let start = json_str(event, &["dates", "event_start_date"])
        .and_then(parse_iso_datetime)
        .or_else(|| json_i64(event, &["date_unix"]).and_then(from_unix))?;

    let source_id = json_id(event, "id").unwrap_or_default();
    let title = json_str(event, &["name"]).unwrap_or_default();
    let mut raw = RawEvent::new(Source::Dice, source_id, title, start.date());
    raw.start_time = Some(start.time());
    raw.end_time = json_str(event, &["dates", "event_end_date"])
        .and_then(parse_iso_datetime)
        .map(|dt| dt.time());

    if let Some(venue) = json_array(event, &["venues"]).first() {
        raw.venue_name = json_str(venue, &["name"]).map(String::from);
        raw.venue_address = json_str(venue, &["address"]).map(String::from);
    }

    raw.artists = json_array(event, &["summary_lineup", "top_artists"])
        .iter()
        .filter_map(|a| json_str(a, &["name"]))
        .map(String::from)
        .collect();

    if let Some(cents) = json_i64(event, &["price", "amount"]) {
        raw.price_min_cents = Some(cents);
        raw.cost_display = Some(format_price(cents));
    }

    raw.source_url =
        json_str(event, &["perm_name"]).map(|slug| format!("https://dice.fm/event/{slug}"));
    raw.image_url = json_str(event, &["images", "square"])
        .or_else(|| json_str(event, &["images", "landscape"]))
        .map(String::from);
    raw.description = match event.get("about") {
        Some(JsonValue::String(text)) if !text.is_empty() => Some(text.clone()),
        Some(about @ JsonValue::Object(_)) => json_str(about, &["description"]).map(String::from),
        _ => None,
    };
    Some(raw)
}

#[async_trait]
impl SourceAdapter for DiceAdapter {
    fn source(&self) -> Source {
        Source::Dice
    }

    async fn scrape(&self) -> Result<Vec<RawEvent>, AdapterError> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for url in &self.category_urls {
            let html = self.http.get_text(Source::Dice, url).await?;
            for event in parse_category_page(&html) {
                if seen.insert(event.source_id.clone()) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }
}
