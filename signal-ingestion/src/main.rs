use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::config::{config_path, create_config_template, load_config_or_default};
use common::{postgres, CompaniesSection, DatabaseConfig, PgSignalStore};
use signal_ingestion::{default_registry, Orchestrator, OrchestratorConfig};

/// Sections of the shared config file this service reads
#[derive(Debug, Default, Deserialize)]
struct IngestionConfig {
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    #[serde(flatten)]
    companies: CompaniesSection,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting signal ingestion");

    let path = config_path();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--init-config") {
        create_config_template(&path).with_context(|| format!("writing {}", path))?;
        info!(config = %path, "📝 Wrote config template");
        return Ok(());
    }

    let config: IngestionConfig =
        load_config_or_default(&path).with_context(|| format!("loading {}", path))?;

    let companies = config.companies.into_registry()?;
    if companies.is_empty() {
        warn!(config = %path, "No companies configured, nothing to ingest");
        return Ok(());
    }

    // Optional positional args restrict the run to these signal types
    let subset = (!args.is_empty()).then_some(args);

    let pool = postgres::connect(&config.database.with_env_override()).await?;
    let store = PgSignalStore::new(pool);
    store.initialize().await?;

    let registry = Arc::new(default_registry());
    info!(
        processors = registry.len(),
        companies = companies.len(),
        "Registry ready"
    );

    let end = Utc::now();
    let start = end - Duration::days(config.orchestrator.lookback_days);
    let orchestrator = Orchestrator::new(registry, Arc::new(store), config.orchestrator);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("👋 Shutting down, storing completed processors"),
            Err(e) => {
                warn!("Cannot listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let results = orchestrator
        .ingest_all_companies_until(&companies, start, end, subset.as_deref(), shutdown)
        .await;

    let mut inserted = 0;
    let mut failed_companies = 0;
    for (company_id, result) in &results {
        match result {
            Ok(report) => {
                inserted += report.inserted;
                for (signal_type, status) in report.failures() {
                    warn!(company = %company_id, processor = %signal_type, ?status, "Processor failed");
                }
            }
            Err(_) => failed_companies += 1,
        }
    }
    info!(
        companies = results.len(),
        failed_companies,
        inserted,
        "✅ Ingestion run finished"
    );

    Ok(())
}
