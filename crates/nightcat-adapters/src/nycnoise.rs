use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use nightcat_core::{RawEvent, Source};
use nightcat_storage::HttpFetcher;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;

use crate::{element_text, parse_iso_date_prefix, selector, text_or_none, AdapterError, SourceAdapter};

pub const BASE_URL: &str = "https://nyc-noise.com";

const TITLE_SEPARATORS: [&str; 5] = [" | ", " - ", " w/ ", " ft. ", " feat. "];

static CLOCK_12H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm)").expect("valid 12h clock regex"));
static VENUE_AT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\s*([^(,\n]+)").expect("valid venue regex"));
static COST: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\$|\$\d+").expect("valid cost regex"));

pub struct NycNoiseAdapter {
    http: HttpFetcher,
    page_url: String,
}

impl NycNoiseAdapter {
    pub fn new(http: HttpFetcher, page_url: impl Into<String>) -> Self {
        Self {
            http,
            page_url: page_url.into(),
        }
    }
}

/// `MMDDYY` (e.g. `021126` is 2026-02-11), falling back to ISO.
pub fn parse_date_code(code: &str) -> Option<NaiveDate> {
    let code = code.trim();
    if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
        let month = code[0..2].parse().ok()?;
        let day = code[2..4].parse().ok()?;
        let year = 2000 + code[4..6].parse::<i32>().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    parse_iso_date_prefix(code)
}

/// Start of a free-form time like `8pm`, `10:30 PM`, `22:00` or `7pm-10pm`.
pub fn parse_start_time(raw: &str) -> Option<NaiveTime> {
    let start = raw
        .split(['-', '–', '*'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if start.is_empty() {
        return None;
    }
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(&start, fmt) {
            return Some(time);
        }
    }

    let caps = CLOCK_12H.captures(&start)?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    match &caps[3] {
        "pm" if hour != 12 => hour += 12,
        "am" if hour == 12 => hour = 0,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Splits `title<sep>artist, artist` on the first separator present.
pub fn split_title_and_artists(raw: &str) -> (String, Vec<String>) {
    for sep in TITLE_SEPARATORS {
        if let Some((title, artists)) = raw.split_once(sep) {
            let artists = artists
                .split(',')
                .filter_map(text_or_none)
                .collect();
            return (title.trim().to_string(), artists);
        }
    }
    (raw.trim().to_string(), Vec::new())
}

pub fn extract_venue(text: &str) -> Option<String> {
    VENUE_AT
        .captures(text)
        .and_then(|caps| text_or_none(&caps[1]))
}

pub fn extract_cost(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    if lowered.contains("notaflof") {
        return Some("NOTAFLOF".to_string());
    }
    if let Some(found) = COST.find(text) {
        return Some(found.as_str().to_string());
    }
    lowered.contains("free").then(|| "Free".to_string())
}

fn parse_item(item: &ElementRef<'_>, base_url: &str) -> Result<Option<RawEvent>, AdapterError> {
    let attr = |name: &str| item.value().attr(name).unwrap_or_default();

    let date_code = attr("data-date");
    let Some(event_date) = parse_date_code(date_code) else {
        return Ok(None);
    };

    let text = element_text(item);
    let (mut title, artists) = split_title_and_artists(attr("data-title-and-artists"));
    if title.is_empty() {
        title = text.chars().take(200).collect();
    }
    if title.is_empty() {
        return Ok(None);
    }

    let source_id = format!("{date_code}_{}", title.chars().take(50).collect::<String>());
    let mut raw = RawEvent::new(Source::NycNoise, source_id, title, event_date);
    raw.start_time = parse_start_time(attr("data-starttime"));
    raw.artists = artists;
    raw.venue_name = extract_venue(&text);
    raw.cost_display = extract_cost(&text);

    let link_sel = selector("a[href]")?;
    raw.source_url = item
        .select(&link_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| {
            if href.starts_with("http") {
                Some(href.to_string())
            } else if href.starts_with('/') {
                Some(format!("{}{href}", base_url.trim_end_matches('/')))
            } else {
                None
            }
        });

    if let Some(venue_id) = text_or_none(attr("data-venue-id")) {
        raw.extra.insert("venue_id".to_string(), JsonValue::String(venue_id));
    }
    Ok(Some(raw))
}

pub fn parse_page(html: &str, base_url: &str) -> Result<Vec<RawEvent>, AdapterError> {
    let document = Html::parse_document(html);
    let item_sel = selector("div.event[data-date]")?;
    let mut events = Vec::new();
    for item in document.select(&item_sel) {
        if let Some(event) = parse_item(&item, base_url)? {
            events.push(event);
        }
    }
    Ok(events)
}

#[async_trait]
impl SourceAdapter for NycNoiseAdapter {
    fn source(&self) -> Source {
        Source::NycNoise
    }

    async fn scrape(&self) -> Result<Vec<RawEvent>, AdapterError> {
        let html = self.http.get_text(Source::NycNoise, &self.page_url).await?;
        parse_page(&html, &self.page_url)
    }
}
