use std::collections::HashSet;

use async_trait::async_trait;
use nightcat_core::{RawEvent, Source};
use nightcat_storage::HttpFetcher;
use serde_json::Value as JsonValue;

use crate::{
    extract_next_data, json_array, json_i64, json_id, json_str, parse_iso_datetime, text_or_none,
    AdapterError, SourceAdapter,
};

pub const DISCOVER_URL: &str = "https://partiful.com/discover/nyc";

pub struct PartifulAdapter {
    http: HttpFetcher,
    urls: Vec<String>,
}

impl PartifulAdapter {
    pub fn new(http: HttpFetcher, urls: Vec<String>) -> Self {
        Self { http, urls }
    }
}

/// Feed items are either `{event: {...}}` wrappers or the event itself.
fn unwrap_item(item: &JsonValue) -> &JsonValue {
    match item.get("event") {
        Some(event) if event.is_object() => event,
        _ => item,
    }
}

/// Walks trending, sectioned, then plain feed items, keeping the first
/// occurrence of each event id.
pub fn parse_discover_page(html: &str) -> Vec<RawEvent> {
    let Some(data) = extract_next_data(html) else {
        return Vec::new();
    };
    let props = &data["props"]["pageProps"];

    let trending = json_array(props, &["trendingSection", "items"]).iter();
    let sectioned = json_array(props, &["sections"])
        .iter()
        .flat_map(|section| json_array(section, &["items"]).iter());
    let feed = json_array(props, &["feedItems"]).iter();

    let mut seen = HashSet::new();
    let mut events = Vec::new();
    for item in trending.chain(sectioned).chain(feed) {
        let event = unwrap_item(item);
        let id = json_id(event, "id").unwrap_or_default();
        if seen.contains(&id) {
            continue;
        }
        if let Some(parsed) = parse_event(event) {
            seen.insert(id);
            events.push(parsed);
        }
    }
    events
}

fn join_lines(lines: &[JsonValue]) -> Option<String> {
    let parts = lines.iter().filter_map(JsonValue::as_str).collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

pub fn parse_event(event: &JsonValue) -> Option<RawEvent> {
    let start = json_str(event, &["startDate"]).and_then(parse_iso_datetime)?;
    let id = json_id(event, "id").unwrap_or_default();
    let title = json_str(event, &["title"])
        .or_else(|| json_str(event, &["name"]))
        .unwrap_or_default();

    let mut raw = RawEvent::new(Source::Partiful, id.clone(), title, start.date());
    raw.start_time = Some(start.time());
    raw.end_time = json_str(event, &["endDate"])
        .and_then(parse_iso_datetime)
        .map(|dt| dt.time());

    let maps_lines = json_array(event, &["locationInfo", "mapsInfo", "addressLines"]);
    let address_lines = if maps_lines.is_empty() {
        json_array(event, &["locationInfo", "displayAddressLines"])
    } else {
        maps_lines
    };
    raw.venue_address = join_lines(address_lines);
    raw.venue_name = json_str(event, &["locationInfo", "mapsInfo", "approximateLocation"])
        .map(String::from);

    raw.description = json_str(event, &["description"]).and_then(text_or_none);
    raw.source_url = (!id.is_empty()).then(|| format!("https://partiful.com/e/{id}"));
    raw.image_url = match event.get("image") {
        Some(JsonValue::String(url)) => text_or_none(url),
        Some(image @ JsonValue::Object(_)) => json_str(image, &["url"]).map(String::from),
        _ => None,
    };
    raw.attending_count = ["goingGuestCount", "approvedGuestCount", "interestedGuestCount"]
        .into_iter()
        .filter_map(|key| json_i64(event, &[key]))
        .find(|count| *count != 0);
    Some(raw)
}

#[async_trait]
impl SourceAdapter for PartifulAdapter {
    fn source(&self) -> Source {
        Source::Partiful
    }

    async fn scrape(&self) -> Result<Vec<RawEvent>, AdapterError> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for url in &self.urls {
            let html = self.http.get_text(Source::Partiful, url).await?;
            for event in parse_discover_page(&html) {
                if seen.insert(event.source_id.clone()) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }
}
