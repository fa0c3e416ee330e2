use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::config::{config_path, load_config_or_default};
use common::{
    postgres, CompaniesSection, Company, DatabaseConfig, PgPriceStore, PgSignalStore, SignalStore,
    SignalSummary,
};
use signal_analytics::{
    AnalysisError, BacktestConfig, BacktestEngine, CorrelationConfig, CorrelationEngine,
};

/// Sections of the shared config file this service reads
#[derive(Debug, Default, Deserialize)]
struct AnalyticsConfig {
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    backtest: BacktestConfig,
    #[serde(default)]
    correlation: CorrelationConfig,
    #[serde(flatten)]
    companies: CompaniesSection,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("📈 Starting signal analytics");

    let path = config_path();
    let config: AnalyticsConfig =
        load_config_or_default(&path).with_context(|| format!("loading {}", path))?;
    config.backtest.validate()?;
    let registry = config.companies.into_registry()?;

    // Optional positional args restrict the run to these companies
    let requested: Vec<String> = std::env::args().skip(1).collect();
    let companies: Vec<&Company> = registry
        .list_all()
        .into_iter()
        .filter(|c| requested.is_empty() || requested.contains(&c.id))
        .collect();
    if companies.is_empty() {
        warn!(config = %path, "No companies to analyze");
        return Ok(());
    }

    let pool = postgres::connect(&config.database.clone().with_env_override()).await?;
    let signals = Arc::new(PgSignalStore::new(pool.clone()));
    signals.initialize().await?;
    let prices = Arc::new(PgPriceStore::new(pool));

    let backtester = BacktestEngine::new(signals.clone(), prices, config.backtest.clone());
    let correlations = CorrelationEngine::new(signals.clone(), config.correlation.clone());

    for company in companies {
        // Last 90 days at a glance
        let end = Utc::now();
        let start = end - Duration::days(90);
        let recent = signals.query_by_company(&company.id, None, Some(start)).await?;
        let mut signal_types: Vec<&str> = recent.iter().map(|s| s.signal_type.as_str()).collect();
        signal_types.sort_unstable();
        signal_types.dedup();
        for signal_type in signal_types {
            let summary = SignalSummary::build(&company.id, signal_type, start, end, &recent);
            info!(
                company = %company.id,
                signal_type,
                total = summary.total_signals,
                avg_score = summary.avg_score,
                bullish = summary.bullish_signals,
                bearish = summary.bearish_signals,
                "Recent signals"
            );
        }

        match backtester.run(&company.ticker).await {
            Ok(report) => {
                info!(
                    ticker = %report.ticker,
                    signals = report.total_signals,
                    analyzed = report.signal_results.len(),
                    "Backtest for {} ({} to {})",
                    company.name,
                    report.date_range.0,
                    report.date_range.1
                );
                for result in report.predictive_signals() {
                    info!(
                        "  ✅ {} predictive: best window {:?} (p={:.4})",
                        result.signal_type, result.best_window, result.best_p_value
                    );
                }
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(e @ (AnalysisError::NoSignals(_) | AnalysisError::NoPriceData(_))) => {
                warn!(ticker = %company.ticker, "Skipping backtest: {}", e);
            }
            Err(e) => error!(ticker = %company.ticker, "Backtest failed: {}", e),
        }

        match correlations.analyze_company(&company.id).await {
            Ok(results) => {
                for result in &results {
                    info!("  {}", result);
                }
            }
            Err(AnalysisError::NoSignals(_)) => {
                warn!(company = %company.id, "No signals to correlate");
            }
            Err(e) => error!(company = %company.id, "Correlation analysis failed: {}", e),
        }
    }

    Ok(())
}
