use async_trait::async_trait;
use nightcat_core::{RawEvent, Source};
use nightcat_storage::HttpFetcher;
use serde_json::Value as JsonValue;

use crate::{
    json_i64, json_id, json_str, parse_iso_datetime, text_or_none, AdapterError, SourceAdapter,
};

pub const API_URL: &str = "https://basement.mtebi.com/events/public?status=published&limit=100";
pub const DEFAULT_VENUE: &str = "Basement NY";

const LINEUP_KEYS: [&str; 4] = ["basement_stage", "studio_stage", "lineup", "artists"];

pub struct BasementAdapter {
    http: HttpFetcher,
    urls: Vec<String>,
}

impl BasementAdapter {
    pub fn new(http: HttpFetcher, urls: Vec<String>) -> Self {
        Self { http, urls }
    }
}

/// Accepts a bare list or an object wrapping it under `events` or `data`.
pub fn parse_payload(payload: &JsonValue) -> Vec<RawEvent> {
    let listings = match payload {
        JsonValue::Array(items) => items.as_slice(),
        JsonValue::Object(map) => map
            .get("events")
            .or_else(|| map.get("data"))
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    listings.iter().filter_map(parse_event).collect()
}

fn first_str<'a>(event: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| json_str(event, &[*key]))
}

fn first_i64(event: &JsonValue, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .filter_map(|key| json_i64(event, &[*key]))
        .find(|v| *v != 0)
}

/// Stage fields hold comma-separated names or lists of names/`{name}`;
/// duplicates across stages keep their first position.
pub fn collect_lineup(event: &JsonValue) -> Vec<String> {
    let mut lineup: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !lineup.iter().any(|existing| existing == name) {
            lineup.push(name.to_string());
        }
    };
    for key in LINEUP_KEYS {
        match event.get(key) {
            Some(JsonValue::String(names)) => names.split(',').for_each(&mut push),
            Some(JsonValue::Array(entries)) => {
                for entry in entries {
                    match entry {
                        JsonValue::String(name) => push(name.as_str()),
                        JsonValue::Object(_) => {
                            if let Some(name) = json_str(entry, &["name"]) {
                                push(name);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    lineup
}

pub fn parse_event(event: &JsonValue) -> Option<RawEvent> {
    let start = first_str(event, &["start_date", "startDate", "date"]).and_then(parse_iso_datetime)?;
    let id = json_id(event, "id").unwrap_or_default();
    let title = first_str(event, &["title", "name"]).unwrap_or_default();

    let mut raw = RawEvent::new(Source::Basement, id.clone(), title, start.date());
    raw.start_time = Some(start.time());
    raw.end_time = first_str(event, &["end_date", "endDate"])
        .and_then(parse_iso_datetime)
        .map(|dt| dt.time());
    raw.artists = collect_lineup(event);
    raw.venue_name = Some(
        first_str(event, &["venue_name", "venue"])
            .unwrap_or(DEFAULT_VENUE)
            .to_string(),
    );
    raw.venue_address = json_str(event, &["venue_address"]).map(String::from);
    raw.cost_display = match event.get("price").or_else(|| event.get("cost_display")) {
        Some(JsonValue::String(text)) => text_or_none(text),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    raw.price_min_cents = first_i64(event, &["price_min", "price_min_cents"]);
    raw.price_max_cents = first_i64(event, &["price_max", "price_max_cents"]);
    raw.source_url = first_str(event, &["url", "ticket_link", "ticket_url"])
        .map(String::from)
        .or_else(|| (!id.is_empty()).then(|| format!("https://basementny.net/events/{id}")));
    raw.attending_count = first_i64(event, &["attending_count", "rsvp_count"]);
    raw.description = json_str(event, &["description"]).map(String::from);
    raw.image_url = first_str(event, &["image", "cover_image", "imageUrl"]).map(String::from);
    Some(raw)
}

#[async_trait]
impl SourceAdapter for BasementAdapter {
    fn source(&self) -> Source {
        Source::Basement
    }

    async fn scrape(&self) -> Result<Vec<RawEvent>, AdapterError> {
        let mut events = Vec::new();
        for url in &self.urls {
            let payload: JsonValue = self.http.get_json(Source::Basement, url).await?;
            events.extend(parse_payload(&payload));
        }
        Ok(events)
    }
}
