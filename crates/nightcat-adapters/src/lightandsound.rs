//! Light & Sound: an HTML listing of ticket links, enriched per link from the
//! ticket page's JSON-LD `Event` block.

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use nightcat_core::{RawEvent, Source};
use nightcat_storage::HttpFetcher;
use scraper::Html;
use serde_json::Value as JsonValue;

use crate::{
    element_text, json_str, parse_iso_date_prefix, parse_iso_datetime, selector, text_or_none,
    AdapterError, SourceAdapter,
};

pub const BASE_URL: &str = "https://lightandsound.design";

const TICKET_HOSTS: [&str; 2] = ["eventcreate.com/e/", "dice.fm"];
const DATED_FORMATS: [&str; 5] = ["%m.%d.%Y", "%B %d, %Y", "%b %d, %Y", "%m/%d/%Y", "%m-%d-%Y"];

pub struct LightAndSoundAdapter {
    http: HttpFetcher,
    listing_url: String,
}

impl LightAndSoundAdapter {
    pub fn new(http: HttpFetcher, listing_url: impl Into<String>) -> Self {
        Self {
            http,
            listing_url: listing_url.into(),
        }
    }

    async fn enrich(&self, mut stub: RawEvent) -> RawEvent {
        let Some(url) = stub.source_url.clone() else {
            return stub;
        };
        match self.http.get_text(Source::LightAndSound, &url).await {
            Ok(html) => {
                if let Some(ld) = find_event_json_ld(&html) {
                    apply_json_ld(&mut stub, &ld);
                }
            }
            Err(err) => {
                tracing::warn!(
                    source_id = %stub.source_id,
                    url = %url,
                    error = %err,
                    "enrich_failed"
                );
            }
        }
        stub
    }
}

/// Listing dates come in several site-editor formats; a bare `Month D`
/// means the current year.
pub fn parse_listing_date(text: &str, current_year: i32) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(date) = parse_iso_date_prefix(text) {
        return Some(date);
    }
    DATED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(&format!("{text} {current_year}"), "%B %d %Y").ok()
        })
}

fn is_ticket_link(href: &str) -> bool {
    href.starts_with("http") && TICKET_HOSTS.iter().any(|host| href.contains(host))
}

pub fn parse_listing(html: &str, current_year: i32) -> Result<Vec<RawEvent>, AdapterError> {
    let document = Html::parse_document(html);
    let link_sel = selector("a[href]")?;
    let date_sel = selector(".date")?;

    let mut stubs = Vec::new();
    for link in document.select(&link_sel) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !is_ticket_link(href) {
            continue;
        }
        let Some(date_el) = link.select(&date_sel).next() else {
            continue;
        };
        let date_text = element_text(&date_el);
        let Some(event_date) = parse_listing_date(&date_text, current_year) else {
            continue;
        };
        let Some(title) = text_or_none(element_text(&link).replace(&date_text, "")) else {
            continue;
        };
        let source_id = href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(href)
            .to_string();

        let mut stub = RawEvent::new(Source::LightAndSound, source_id, title, event_date);
        stub.source_url = Some(href.to_string());
        stubs.push(stub);
    }
    Ok(stubs)
}

fn as_event(value: JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::Array(items) => items
            .into_iter()
            .find(|item| item.get("@type").and_then(JsonValue::as_str) == Some("Event")),
        obj @ JsonValue::Object(_) => {
            (obj.get("@type").and_then(JsonValue::as_str) == Some("Event")).then_some(obj)
        }
        _ => None,
    }
}

/// First JSON-LD block describing an `Event`, bare or inside a list.
pub fn find_event_json_ld(html: &str) -> Option<JsonValue> {
    let document = Html::parse_document(html);
    let sel = selector(r#"script[type="application/ld+json"]"#).ok()?;
    document
        .select(&sel)
        .filter_map(|script| serde_json::from_str(&script.text().collect::<String>()).ok())
        .find_map(as_event)
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Copies JSON-LD details into fields the listing stub left empty.
pub fn apply_json_ld(stub: &mut RawEvent, ld: &JsonValue) {
    fill(
        &mut stub.start_time,
        json_str(ld, &["startDate"]).and_then(parse_iso_datetime).map(|dt| dt.time()),
    );
    fill(
        &mut stub.end_time,
        json_str(ld, &["endDate"]).and_then(parse_iso_datetime).map(|dt| dt.time()),
    );

    if let Some(location) = ld.get("location").filter(|l| l.is_object()) {
        fill(&mut stub.venue_name, json_str(location, &["name"]).map(String::from));
        let address = match location.get("address") {
            Some(JsonValue::String(text)) => text_or_none(text),
            Some(addr @ JsonValue::Object(_)) => {
                json_str(addr, &["streetAddress"]).map(String::from)
            }
            _ => None,
        };
        fill(&mut stub.venue_address, address);
    }

    fill(&mut stub.description, json_str(ld, &["description"]).and_then(text_or_none));
    let image = match ld.get("image") {
        Some(JsonValue::String(url)) => text_or_none(url),
        Some(JsonValue::Array(urls)) => urls.first().and_then(JsonValue::as_str).and_then(text_or_none),
        _ => None,
    };
    fill(&mut stub.image_url, image);

    if stub.artists.is_empty() {
        let performers = ld.get("performer").or_else(|| ld.get("performers"));
        stub.artists = match performers {
            Some(JsonValue::Array(list)) => list
                .iter()
                .filter_map(|p| json_str(p, &["name"]))
                .map(String::from)
                .collect(),
            Some(single @ JsonValue::Object(_)) => {
                json_str(single, &["name"]).map(String::from).into_iter().collect()
            }
            _ => Vec::new(),
        };
    }

    let offer = match ld.get("offers") {
        Some(JsonValue::Array(list)) => list.first(),
        other => other,
    };
    let price = offer.and_then(|o| o.get("price")).and_then(|p| match p {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    });
    if let Some(price) = price.filter(|p| *p > 0.0) {
        fill(&mut stub.price_min_cents, Some((price * 100.0) as i64));
        fill(&mut stub.cost_display, Some(format!("${price:.0}")));
    }
}

#[async_trait]
impl SourceAdapter for LightAndSoundAdapter {
    fn source(&self) -> Source {
        Source::LightAndSound
    }

    async fn scrape(&self) -> Result<Vec<RawEvent>, AdapterError> {
        let html = self
            .http
            .get_text(Source::LightAndSound, &self.listing_url)
            .await?;
        let stubs = parse_listing(&html, Local::now().year())?;

        let mut events = Vec::with_capacity(stubs.len());
        for stub in stubs {
            events.push(self.enrich(stub).await);
        }
        Ok(events)
    }
}
