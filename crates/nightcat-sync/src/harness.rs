//! Concurrent adapter execution with per-source failure isolation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use nightcat_adapters::SourceAdapter;
use nightcat_core::{RawEvent, ScrapeOutcome, Source};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct HarnessReport {
    /// Only sources that succeeded with at least one record appear here.
    pub events: BTreeMap<Source, Vec<RawEvent>>,
    /// One entry per adapter, in launch order.
    pub outcomes: Vec<ScrapeOutcome>,
}

impl HarnessReport {
    pub fn total_events(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    /// Flattens to one batch, grouped by source in source order.
    pub fn into_events(self) -> Vec<RawEvent> {
        self.events.into_values().flatten().collect()
    }
}

/// Runs every adapter as its own task and waits for all of them. A failing or
/// panicking adapter only affects its own outcome.
pub async fn run_adapters(adapters: Vec<Arc<dyn SourceAdapter>>) -> HarnessReport {
    let tasks = adapters
        .into_iter()
        .map(|adapter| {
            let source = adapter.source();
            let started = Instant::now();
            let handle = tokio::spawn(async move {
                let result = adapter.scrape().await;
                (result, started.elapsed())
            });
            async move { (source, started, handle.await) }
        })
        .collect::<Vec<_>>();

    let mut report = HarnessReport::default();
    for (source, started, joined) in join_all(tasks).await {
        let outcome = match joined {
            Ok((Ok(events), duration)) => {
                info!(
                    source = %source,
                    count = events.len(),
                    duration_ms = duration.as_millis() as u64,
                    "scrape_complete"
                );
                let outcome = ScrapeOutcome::success(source, events.len(), duration);
                if !events.is_empty() {
                    report.events.entry(source).or_default().extend(events);
                }
                outcome
            }
            Ok((Err(err), duration)) => {
                warn!(source = %source, error = %err, "scrape_failed");
                ScrapeOutcome::failure(source, err.to_string(), duration)
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "adapter task panicked".to_string()
                } else {
                    join_err.to_string()
                };
                warn!(source = %source, error = %message, "scrape_failed");
                ScrapeOutcome::failure(source, message, started.elapsed())
            }
        };
        report.outcomes.push(outcome);
    }
    report
}
