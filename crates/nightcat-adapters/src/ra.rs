//! Resident Advisor listings via its public GraphQL endpoint.

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use nightcat_core::{RawEvent, Source};
use nightcat_storage::HttpFetcher;
use serde_json::{json, Value as JsonValue};

use crate::{
    json_array, json_i64, json_id, json_str, parse_clock_time, parse_iso_date_prefix,
    AdapterError, SourceAdapter,
};

pub const GRAPHQL_URL: &str = "https://ra.co/graphql";
/// New York.
pub const DEFAULT_AREA_ID: u32 = 8;
pub const PAGE_SIZE: i64 = 100;
pub const MAX_PAGES: i64 = 5;

const LISTING_QUERY: &str = r#"
query GET_DEFAULT_EVENTS_LISTING(
  $filters: FilterInputDtoInput
  $pageSize: Int
  $page: Int
) {
  eventListings(filters: $filters, pageSize: $pageSize, page: $page) {
    data {
      id
      event {
        id
        title
        date
        startTime
        endTime
        contentUrl
        images { filename }
        venue { id name address }
        artists { id name }
        attending
        cost
        pick { blurb }
      }
    }
    totalResults
  }
}
"#;

pub struct RaAdapter {
    http: HttpFetcher,
    endpoint: String,
    area: u32,
}

impl RaAdapter {
    pub fn new(http: HttpFetcher, endpoint: impl Into<String>, area: u32) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            area,
        }
    }
}

pub fn listing_request(area: u32, from: NaiveDate, page: i64) -> JsonValue {
    json!({
        "query": LISTING_QUERY,
        "variables": {
            "filters": {
                "areas": {"eq": area},
                "listingDate": {"gte": from.format("%Y-%m-%d").to_string()},
            },
            "pageSize": PAGE_SIZE,
            "page": page,
        }
    })
}

/// One GraphQL response page: the parsed events, how many listing items the
/// page carried, and the reported total.
#[derive(Debug, Default)]
pub struct ListingPage {
    pub events: Vec<RawEvent>,
    pub item_count: usize,
    pub total_results: i64,
}

pub fn parse_listing_page(payload: &JsonValue) -> ListingPage {
    let items = json_array(payload, &["data", "eventListings", "data"]);
    let events = items
        .iter()
        .filter_map(|item| item.get("event"))
        .filter_map(parse_event)
        .collect();
    ListingPage {
        events,
        item_count: items.len(),
        total_results: json_i64(payload, &["data", "eventListings", "totalResults"]).unwrap_or(0),
    }
}

pub fn parse_event(event: &JsonValue) -> Option<RawEvent> {
    let event_date = json_str(event, &["date"]).and_then(parse_iso_date_prefix)?;
    let source_id = json_id(event, "id")?;
    let title = json_str(event, &["title"]).unwrap_or_default();

    let mut raw = RawEvent::new(Source::Ra, source_id, title, event_date);
    raw.start_time = json_str(event, &["startTime"]).and_then(parse_clock_time);
    raw.end_time = json_str(event, &["endTime"]).and_then(parse_clock_time);
    raw.venue_name = json_str(event, &["venue", "name"]).map(String::from);
    raw.venue_address = json_str(event, &["venue", "address"]).map(String::from);
    raw.artists = json_array(event, &["artists"])
        .iter()
        .filter_map(|a| json_str(a, &["name"]))
        .map(String::from)
        .collect();
    raw.cost_display = json_str(event, &["cost"]).map(String::from);
    raw.source_url = json_str(event, &["contentUrl"]).map(|path| format!("https://ra.co{path}"));
    raw.attending_count = json_i64(event, &["attending"]);
    raw.description = json_str(event, &["pick", "blurb"]).map(String::from);
    raw.image_url = json_array(event, &["images"])
        .first()
        .and_then(|img| json_str(img, &["filename"]))
        .map(|file| format!("https://ra.co/images/events/flyer/{file}"));
    Some(raw)
}

#[async_trait]
impl SourceAdapter for RaAdapter {
    fn source(&self) -> Source {
        Source::Ra
    }

    async fn scrape(&self) -> Result<Vec<RawEvent>, AdapterError> {
        let today = Local::now().date_naive();
        let mut events = Vec::new();
        let mut page = 1;
        loop {
            let body = listing_request(self.area, today, page);
            let payload: JsonValue = self
                .http
                .post_json(Source::Ra, &self.endpoint, &body)
                .await?;
            let parsed = parse_listing_page(&payload);
            if parsed.item_count == 0 {
                break;
            }
            events.extend(parsed.events);

            if page * PAGE_SIZE >= parsed.total_results || page >= MAX_PAGES {
                break;
            }
            page += 1;
        }
        Ok(events)
    }
}
