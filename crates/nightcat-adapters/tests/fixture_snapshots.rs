use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nightcat_adapters::{
    adapter_for_source, basement, dice, lightandsound, nycnoise, partiful, ra, AdapterError,
    AdapterSettings,
};
use nightcat_core::{RawEvent, Source};
use nightcat_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde::Deserialize;

#[derive(Debug, PartialEq, Deserialize)]
struct GoldenEvent {
    source_id: String,
    title: String,
    event_date: String,
    venue_name: Option<String>,
    artists: Vec<String>,
}

fn fixture_dir(source: Source) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join(source.as_str())
}

fn read(source: Source, name: &str) -> String {
    fs::read_to_string(fixture_dir(source).join(name)).expect("read fixture")
}

fn snapshot(source: Source) -> Vec<GoldenEvent> {
    serde_json::from_str(&read(source, "snapshot.json")).expect("parse snapshot")
}

fn to_golden(events: &[RawEvent]) -> Vec<GoldenEvent> {
    events
        .iter()
        .map(|e| GoldenEvent {
            source_id: e.source_id.clone(),
            title: e.title.clone(),
            event_date: e.event_date.to_string(),
            venue_name: e.venue_name.clone(),
            artists: e.artists.clone(),
        })
        .collect()
}

fn parse_fixture(source: Source) -> Vec<RawEvent> {
    match source {
        Source::Ra => {
            let payload = serde_json::from_str(&read(source, "listing.json")).unwrap();
            ra::parse_listing_page(&payload).events
        }
        Source::Dice => dice::parse_category_page(&read(source, "category.html")),
        Source::Partiful => partiful::parse_discover_page(&read(source, "discover.html")),
        Source::Basement => {
            let payload = serde_json::from_str(&read(source, "events.json")).unwrap();
            basement::parse_payload(&payload)
        }
        Source::LightAndSound => {
            lightandsound::parse_listing(&read(source, "listing.html"), 2026).unwrap()
        }
        Source::NycNoise => {
            nycnoise::parse_page(&read(source, "page.html"), nycnoise::BASE_URL).unwrap()
        }
    }
}

#[test]
fn every_source_matches_its_golden_snapshot() {
    for source in Source::ALL {
        let events = parse_fixture(source);
        assert!(events.iter().all(|e| e.source == source), "{source}: wrong source tag");
        assert_eq!(to_golden(&events), snapshot(source), "{source}: snapshot drift");
    }
}

#[test]
fn identities_are_stable_across_reparses() {
    for source in Source::ALL {
        let first = parse_fixture(source);
        let second = parse_fixture(source);
        let ids = |events: &[RawEvent]| {
            events
                .iter()
                .map(|e| (e.source, e.source_id.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second), "{source}: identity changed");
    }
}

#[test]
fn registry_builds_an_adapter_per_source() {
    let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
    for source in Source::ALL {
        let adapter = adapter_for_source(source, &AdapterSettings::default(), http.clone());
        assert_eq!(adapter.source(), source);
    }
}

#[tokio::test]
async fn unreachable_source_surfaces_a_fetch_error() {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(2),
        backoff: BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
        ..HttpClientConfig::default()
    })
    .unwrap();
    let settings = AdapterSettings {
        listing_urls: vec!["http://127.0.0.1:9/feed".to_string()],
        area: None,
    };
    let adapter = adapter_for_source(Source::Basement, &settings, http);
    let err = adapter.scrape().await.unwrap_err();
    assert!(matches!(err, AdapterError::Fetch(_)), "{err}");
}
