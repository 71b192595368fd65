//! Ingestion pipeline orchestration: scrape every enabled source, persist the
//! raw layer, and link records into the canonical catalog.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nightcat_adapters::{adapter_for_source, SourceAdapter};
use nightcat_storage::{EventStore, HttpFetcher, PgEventStore};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub mod config;
pub mod harness;
pub mod linkage;

pub use config::{ConfigError, PipelineConfig, SourceConfig, SourceRegistry};
pub use harness::{run_adapters, HarnessReport};
pub use linkage::{
    artist_jaccard, dedupe_batch, deduplicate_and_store, is_fuzzy_match, match_score,
    merge_into_canonical, token_sort_ratio, LinkageEngine, LinkageSummary, MatchPolicy, MatchScore,
};

pub const CRATE_NAME: &str = "nightcat-sync";

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_run: usize,
    pub sources_failed: usize,
    pub scraped: usize,
    pub linkage: LinkageSummary,
}

impl PipelineRunSummary {
    /// New canonical events created by the run.
    pub fn new_events(&self) -> usize {
        self.linkage.created
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    http: HttpFetcher,
    store: Arc<dyn EventStore>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn EventStore>) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self {
            config,
            http,
            store,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn load_source_registry(&self) -> Result<SourceRegistry> {
        SourceRegistry::load(&self.config.sources_file)
            .await
            .with_context(|| {
                format!(
                    "loading source registry from {}",
                    self.config.sources_file.display()
                )
            })
    }

    pub fn build_adapters(&self, registry: &SourceRegistry) -> Vec<Arc<dyn SourceAdapter>> {
        registry
            .enabled()
            .map(|entry| {
                Arc::from(adapter_for_source(entry.source, &entry.settings, self.http.clone()))
            })
            .collect()
    }

    pub async fn run_once(&self) -> Result<PipelineRunSummary> {
        let registry = self.load_source_registry().await?;
        let adapters = self.build_adapters(&registry);
        self.run_with_adapters(adapters).await
    }

    /// One full pass over the given adapters. Scrape failures are recorded
    /// and tolerated; persistence failures abort the run.
    pub async fn run_with_adapters(
        &self,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<PipelineRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let sources_run = adapters.len();

        let report = run_adapters(adapters).await;
        if let Err(err) = self.store.record_scrape_outcomes(&report.outcomes).await {
            warn!(run_id = %run_id, error = %err, "scrape_outcomes_not_recorded");
        }
        let sources_failed = report
            .outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .count();
        let scraped = report.total_events();
        info!(
            run_id = %run_id,
            total = scraped,
            sources = report.events.len(),
            "scrape_pipeline_scraped"
        );

        let linkage =
            deduplicate_and_store(self.store.as_ref(), report.into_events(), self.config.match_policy)
                .await
                .with_context(|| format!("linking events for run {run_id}"))?;
        info!(run_id = %run_id, new_events = linkage.created, "scrape_pipeline_complete");

        Ok(PipelineRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sources_run,
            sources_failed,
            scraped,
            linkage,
        })
    }
}

pub async fn run_pipeline_once(
    config: PipelineConfig,
    store: Arc<dyn EventStore>,
) -> Result<PipelineRunSummary> {
    Pipeline::new(config, store)?.run_once().await
}

/// Connects to Postgres from `DATABASE_URL`, applies migrations, and runs once.
pub async fn run_pipeline_once_from_env() -> Result<PipelineRunSummary> {
    let config = PipelineConfig::from_env().context("reading pipeline configuration")?;
    let store = PgEventStore::connect(&config.database_url)
        .await
        .context("connecting to event store")?;
    store.migrate().await.context("applying event store migrations")?;
    run_pipeline_once(config, Arc::new(store)).await
}
