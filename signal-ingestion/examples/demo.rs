//! Example usage of the signal ingestion pipeline
//!
//! This example demonstrates:
//! 1. Building the processor registry explicitly
//! 2. Running the orchestrator for a couple of companies
//! 3. Failure isolation (the live Wikipedia fetch may fail offline)
//! 4. Idempotent re-ingestion of the same window
//!
//! Run with `cargo run -p signal-ingestion --example demo`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{
    Company, CompanyRegistry, InMemorySignalStore, RawData, Signal, SignalCategory, SignalMetadata,
    SignalStore,
};
use signal_ingestion::{
    DataCost, Difficulty, Orchestrator, OrchestratorConfig, Processor, ProcessorMetadata,
    ProcessorRegistry, UpdateFrequency, WikipediaPageviewsProcessor,
};

/// Offline source: one signal per day derived from a fixed pattern
struct SyntheticBuzzProcessor {
    metadata: ProcessorMetadata,
}

impl SyntheticBuzzProcessor {
    fn new() -> Self {
        Self {
            metadata: ProcessorMetadata {
                signal_type: "synthetic_buzz".to_string(),
                category: SignalCategory::WebDigital,
                description: "Deterministic demo source".to_string(),
                update_frequency: UpdateFrequency::Daily,
                data_source: "demo".to_string(),
                cost: DataCost::Free,
                difficulty: Difficulty::Easy,
                tags: vec!["demo".to_string()],
            },
        }
    }
}

#[async_trait]
impl Processor for SyntheticBuzzProcessor {
    fn metadata(&self) -> &ProcessorMetadata {
        &self.metadata
    }

    fn is_applicable(&self, company: &Company) -> bool {
        company.is_public_company
    }

    async fn fetch(
        &self,
        _company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawData> {
        let days = (end - start).num_days().max(0);
        let points: Vec<RawData> = (0..days)
            .map(|d| {
                let day = start + Duration::days(d);
                json!({ "day": day.format("%Y-%m-%d").to_string(), "buzz": ((d * 37) % 21 - 10) })
            })
            .collect();
        Ok(json!({ "points": points }))
    }

    fn process(&self, company: &Company, raw: &RawData) -> Result<Vec<Signal>> {
        let points = raw["points"]
            .as_array()
            .ok_or_else(|| anyhow!("missing points"))?;

        let mut signals = Vec::with_capacity(points.len());
        for point in points {
            let day = point["day"].as_str().ok_or_else(|| anyhow!("missing day"))?;
            let buzz = point["buzz"].as_i64().ok_or_else(|| anyhow!("missing buzz"))?;
            let timestamp = chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| anyhow!("invalid day"))?
                .and_utc();

            signals.push(Signal::new(
                company.id.clone(),
                self.metadata.signal_type.clone(),
                self.metadata.category,
                timestamp,
                point.clone(),
                buzz as f64 / 10.0,
                0.5,
                SignalMetadata::new("Demo generator"),
            )?);
        }
        Ok(signals)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("📡 Signal Ingestion - Example");
    info!("=============================");

    // Step 1: Registry
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(WikipediaPageviewsProcessor::new()));
    registry.register(Arc::new(SyntheticBuzzProcessor::new()));
    let registry = Arc::new(registry);
    info!("✅ Registered {} processors", registry.len());

    // Step 2: Companies
    let companies = CompanyRegistry::from_companies([
        Company::new("UBER", "Uber Technologies Inc"),
        Company::new("LYFT", "Lyft Inc"),
    ]);

    // Step 3: Orchestrator over an in-memory store
    let store = Arc::new(InMemorySignalStore::new());
    let orchestrator = Orchestrator::new(
        registry,
        store.clone(),
        OrchestratorConfig {
            processor_timeout_secs: 15,
            ..Default::default()
        },
    );

    let end = Utc::now();
    let start = end - Duration::days(14);

    // Step 4: First run
    let results = orchestrator
        .ingest_all_companies(&companies, start, end, None)
        .await;
    for (company_id, result) in &results {
        let report = result.as_ref().map_err(|e| anyhow!("{}: {:#}", company_id, e))?;
        info!(
            "🏢 {}: generated {}, inserted {}, failures {:?}",
            company_id,
            report.generated,
            report.inserted,
            report.failures()
        );
    }

    // Step 5: Same window again, nothing new is stored
    let again = orchestrator
        .ingest_and_store(&Company::new("UBER", "Uber Technologies Inc"), start, end, None)
        .await?;
    info!(
        "🔁 Re-run for UBER: inserted {}, duplicates {}",
        again.inserted, again.duplicates
    );

    let stats = store.stats().await?;
    info!("📊 Stored {} signals: {:?}", stats.total_signals, stats.signals_by_type);

    Ok(())
}
