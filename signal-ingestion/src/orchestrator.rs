//! Orchestrator - runs every applicable processor for a company and persists
//! the results
//!
//! The Orchestrator manages:
//! - One spawned task per processor, so a failure or panic stays local
//! - A global cap on processors in flight and a per-source cap on fetches
//! - Per-processor deadlines and cooperative cancellation
//! - Idempotent persistence through [`SignalStore::upsert_if_absent`]

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, warn};

use common::{Company, CompanyRegistry, Signal, SignalStore};

use crate::processor::{Processor, ProcessorError, ProcessorOutcome};
use crate::registry::ProcessorRegistry;

/// Configuration for the orchestrator (`[orchestrator]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of processors running concurrently, shared by every
    /// company this orchestrator ingests
    #[serde(default = "default_max_concurrent_processors")]
    pub max_concurrent_processors: usize,

    /// Maximum in-flight fetches against one data source
    #[serde(default = "default_max_concurrent_per_source")]
    pub max_concurrent_per_source: usize,

    /// Deadline for a single processor run; 0 disables it
    #[serde(default = "default_processor_timeout_secs")]
    pub processor_timeout_secs: u64,

    /// Companies ingested concurrently by `ingest_all_companies`
    #[serde(default = "default_max_concurrent_companies")]
    pub max_concurrent_companies: usize,

    /// Window length used by the binary
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

fn default_max_concurrent_processors() -> usize {
    8
}

fn default_max_concurrent_per_source() -> usize {
    2
}

fn default_processor_timeout_secs() -> u64 {
    120
}

fn default_max_concurrent_companies() -> usize {
    4
}

fn default_lookback_days() -> i64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processors: default_max_concurrent_processors(),
            max_concurrent_per_source: default_max_concurrent_per_source(),
            processor_timeout_secs: default_processor_timeout_secs(),
            max_concurrent_companies: default_max_concurrent_companies(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl OrchestratorConfig {
    pub fn processor_timeout(&self) -> Option<Duration> {
        (self.processor_timeout_secs > 0).then(|| Duration::from_secs(self.processor_timeout_secs))
    }
}

/// What happened to one processor during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ProcessorStatus {
    Succeeded { signals: usize, rejected: usize },
    FetchFailed(String),
    ProcessFailed(String),
    Panicked(String),
    TimedOut,
    Cancelled,
}

impl ProcessorStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessorStatus::Succeeded { .. })
    }
}

/// Signals produced by one run, before persistence
#[derive(Debug, Clone, Default)]
pub struct CollectedSignals {
    pub signals_by_type: BTreeMap<String, Vec<Signal>>,
    pub statuses: BTreeMap<String, ProcessorStatus>,
    /// Signals dropped by processor-side validation
    pub rejected: usize,
}

impl CollectedSignals {
    pub fn total_signals(&self) -> usize {
        self.signals_by_type.values().map(Vec::len).sum()
    }

    pub fn into_signals(self) -> Vec<Signal> {
        self.signals_by_type.into_values().flatten().collect()
    }
}

/// Result of a persistence pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Outcome of ingesting one company
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub company_id: String,
    /// Valid signals produced by processors
    pub generated: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Dropped by validation, in processors or before storage
    pub rejected: usize,
    pub statuses: BTreeMap<String, ProcessorStatus>,
}

impl IngestionReport {
    pub fn failures(&self) -> Vec<(&str, &ProcessorStatus)> {
        self.statuses
            .iter()
            .filter(|(_, status)| !status.is_success())
            .map(|(signal_type, status)| (signal_type.as_str(), status))
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, status)| status.is_success())
            .map(|(signal_type, _)| signal_type.as_str())
            .collect()
    }
}

enum TaskResult {
    Finished(Result<ProcessorOutcome, ProcessorError>),
    TimedOut,
}

/// Spawned processor tasks still running. Dropping the set aborts them, so a
/// caller that abandons a run (timeout, `select!`, shutdown) stops its fetches.
#[derive(Default)]
struct InFlight(BTreeMap<String, AbortHandle>);

impl InFlight {
    fn insert(&mut self, signal_type: String, handle: AbortHandle) {
        self.0.insert(signal_type, handle);
    }

    fn finished(&mut self, signal_type: &str) {
        self.0.remove(signal_type);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    /// Abort everything still running, returning the affected signal types
    fn abort_all(&mut self) -> Vec<String> {
        std::mem::take(&mut self.0)
            .into_iter()
            .map(|(signal_type, handle)| {
                handle.abort();
                signal_type
            })
            .collect()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        for handle in self.0.values() {
            handle.abort();
        }
    }
}

/// Orchestrator - coordinates processors for companies
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ProcessorRegistry>,
    store: Arc<dyn SignalStore>,

    // Concurrency limits
    processor_permits: Arc<Semaphore>,
    source_permits: DashMap<String, Arc<Semaphore>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        store: Arc<dyn SignalStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let processor_permits = Arc::new(Semaphore::new(config.max_concurrent_processors.max(1)));
        Self {
            config,
            registry,
            store,
            processor_permits,
            source_permits: DashMap::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Processors to run: the explicit subset if given (repeats ignored),
    /// else everything registered; both filtered by applicability.
    fn resolve_processors(
        &self,
        company: &Company,
        subset: Option<&[String]>,
    ) -> Vec<Arc<dyn Processor>> {
        let candidates = match subset {
            Some(types) => types
                .iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter_map(|signal_type| {
                    let processor = self.registry.get(signal_type);
                    if processor.is_none() {
                        warn!(processor = %signal_type, "Unknown processor requested, skipping");
                    }
                    processor
                })
                .collect(),
            None => self.registry.list_all(),
        };

        candidates
            .into_iter()
            .filter(|p| {
                let applicable = p.is_applicable(company);
                if !applicable {
                    debug!(
                        processor = %p.metadata().signal_type,
                        company = %company.id,
                        "Processor not applicable"
                    );
                }
                applicable
            })
            .collect()
    }

    fn source_semaphore(&self, data_source: &str) -> Arc<Semaphore> {
        let limit = self.config.max_concurrent_per_source.max(1);
        let entry = self
            .source_permits
            .entry(data_source.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)));
        Arc::clone(entry.value())
    }

    /// Run applicable processors without persisting anything
    pub async fn collect(
        &self,
        company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        subset: Option<&[String]>,
    ) -> CollectedSignals {
        self.collect_until(company, start, end, subset, std::future::pending())
            .await
    }

    /// Like [`collect`](Self::collect), but stops when `cancel` resolves.
    /// Processors still in flight at that point are aborted and contribute
    /// nothing. Dropping the returned future aborts them as well.
    pub async fn collect_until<F>(
        &self,
        company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        subset: Option<&[String]>,
        cancel: F,
    ) -> CollectedSignals
    where
        F: Future<Output = ()>,
    {
        let processors = self.resolve_processors(company, subset);
        let company = Arc::new(company.clone());
        let timeout = self.config.processor_timeout();

        let mut pending = FuturesUnordered::new();
        let mut in_flight = InFlight::default();

        for processor in processors {
            let signal_type = processor.metadata().signal_type.clone();
            let source = self.source_semaphore(&processor.metadata().data_source);
            let permits = self.processor_permits.clone();
            let company = company.clone();

            let handle = tokio::spawn(async move {
                // Queue time does not count against the deadline
                let _permit = permits.acquire_owned().await;
                let run = run_processor(processor, company, start, end, source);
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(result) => TaskResult::Finished(result),
                        Err(_) => TaskResult::TimedOut,
                    },
                    None => TaskResult::Finished(run.await),
                }
            });

            in_flight.insert(signal_type.clone(), handle.abort_handle());
            pending.push(async move { (signal_type, handle.await) });
        }

        let mut collected = CollectedSignals::default();
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                biased;

                next = pending.next() => {
                    let Some((signal_type, joined)) = next else {
                        break;
                    };
                    in_flight.finished(&signal_type);
                    let status = record_result(&company.id, &signal_type, joined, &mut collected);
                    collected.statuses.insert(signal_type, status);
                }

                _ = &mut cancel => {
                    warn!(
                        company = %company.id,
                        in_flight = in_flight.len(),
                        "Ingestion cancelled, aborting in-flight processors"
                    );
                    for signal_type in in_flight.abort_all() {
                        collected.statuses.insert(signal_type, ProcessorStatus::Cancelled);
                    }
                    break;
                }
            }
        }

        collected
    }

    /// Re-validate and insert signals that are not stored yet
    pub async fn store_signals(&self, signals: &[Signal]) -> anyhow::Result<StoreSummary> {
        let mut summary = StoreSummary::default();

        for signal in signals {
            if let Err(e) = signal.validate() {
                error!(
                    company = %signal.company_id,
                    signal_type = %signal.signal_type,
                    "Refusing to store invalid signal: {}",
                    e
                );
                summary.rejected += 1;
                continue;
            }

            let inserted = self.store.upsert_if_absent(signal).await.map_err(|e| {
                error!(
                    company = %signal.company_id,
                    signal_type = %signal.signal_type,
                    "Failed to store signal: {:#}",
                    e
                );
                e.context(format!(
                    "storing {} signal for {}",
                    signal.signal_type, signal.company_id
                ))
            })?;

            if inserted {
                summary.inserted += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        Ok(summary)
    }

    /// Collect and persist signals for one company
    pub async fn ingest_and_store(
        &self,
        company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        subset: Option<&[String]>,
    ) -> anyhow::Result<IngestionReport> {
        self.ingest_and_store_until(company, start, end, subset, std::future::pending())
            .await
    }

    /// Collect until `cancel` resolves, then persist whatever completed
    pub async fn ingest_and_store_until<F>(
        &self,
        company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        subset: Option<&[String]>,
        cancel: F,
    ) -> anyhow::Result<IngestionReport>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let collected = self.collect_until(company, start, end, subset, cancel).await;

        let generated = collected.total_signals();
        let processor_rejected = collected.rejected;
        let statuses = collected.statuses.clone();
        let signals = collected.into_signals();

        let stored = self.store_signals(&signals).await?;

        let report = IngestionReport {
            company_id: company.id.clone(),
            generated,
            inserted: stored.inserted,
            duplicates: stored.duplicates,
            rejected: processor_rejected + stored.rejected,
            statuses,
        };

        info!(
            company = %report.company_id,
            processors = report.statuses.len(),
            failed = report.failures().len(),
            generated = report.generated,
            inserted = report.inserted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion complete"
        );

        Ok(report)
    }

    /// Ingest every company in the registry with bounded concurrency.
    /// One company's storage failure does not affect the others.
    pub async fn ingest_all_companies(
        &self,
        companies: &CompanyRegistry,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        subset: Option<&[String]>,
    ) -> BTreeMap<String, anyhow::Result<IngestionReport>> {
        self.ingest_all_companies_until(companies, start, end, subset, std::future::pending())
            .await
    }

    /// [`ingest_all_companies`](Self::ingest_all_companies) that stops when
    /// `cancel` resolves. Companies already running persist what completed;
    /// companies not started yet are skipped.
    pub async fn ingest_all_companies_until<F>(
        &self,
        companies: &CompanyRegistry,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        subset: Option<&[String]>,
        cancel: F,
    ) -> BTreeMap<String, anyhow::Result<IngestionReport>>
    where
        F: Future<Output = ()>,
    {
        let limit = self.config.max_concurrent_companies.max(1);
        let cancel = cancel.shared();

        info!(
            companies = companies.len(),
            concurrency = limit,
            "Starting ingestion run"
        );

        let results: Vec<(String, anyhow::Result<IngestionReport>)> =
            stream::iter(companies.list_all())
                .take_until(cancel.clone())
                .map(|company| {
                    let cancel = cancel.clone();
                    async move {
                        let result = self
                            .ingest_and_store_until(company, start, end, subset, cancel)
                            .await;
                        if let Err(e) = &result {
                            error!(company = %company.id, "Ingestion failed: {:#}", e);
                        }
                        (company.id.clone(), result)
                    }
                })
                .buffer_unordered(limit)
                .collect()
                .await;

        results.into_iter().collect()
    }
}

/// Run the processor while holding its source's permit
async fn run_processor(
    processor: Arc<dyn Processor>,
    company: Arc<Company>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    source: Arc<Semaphore>,
) -> Result<ProcessorOutcome, ProcessorError> {
    let _permit = source.acquire_owned().await;
    processor.run(&company, start, end).await
}

fn record_result(
    company_id: &str,
    signal_type: &str,
    joined: Result<TaskResult, JoinError>,
    collected: &mut CollectedSignals,
) -> ProcessorStatus {
    match joined {
        Ok(TaskResult::Finished(Ok(outcome))) => {
            let status = ProcessorStatus::Succeeded {
                signals: outcome.signals.len(),
                rejected: outcome.rejected,
            };
            collected.rejected += outcome.rejected;
            collected
                .signals_by_type
                .entry(signal_type.to_string())
                .or_default()
                .extend(outcome.signals);
            status
        }
        Ok(TaskResult::Finished(Err(e))) => {
            warn!(processor = %signal_type, company = %company_id, "{}", e);
            if e.is_fetch() {
                ProcessorStatus::FetchFailed(e.to_string())
            } else {
                ProcessorStatus::ProcessFailed(e.to_string())
            }
        }
        Ok(TaskResult::TimedOut) => {
            warn!(processor = %signal_type, company = %company_id, "Processor timed out");
            ProcessorStatus::TimedOut
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e);
            error!(
                processor = %signal_type,
                company = %company_id,
                "Processor panicked: {}",
                message
            );
            ProcessorStatus::Panicked(message)
        }
        Err(_) => ProcessorStatus::Cancelled,
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_processors, 8);
        assert_eq!(config.max_concurrent_per_source, 2);
        assert_eq!(config.processor_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.max_concurrent_companies, 4);
        assert_eq!(config.lookback_days, 30);
    }

    #[test]
    fn test_config_partial_toml() {
        let config: OrchestratorConfig =
            toml::from_str("processor_timeout_secs = 0\nmax_concurrent_per_source = 1\n").unwrap();
        assert_eq!(config.processor_timeout(), None);
        assert_eq!(config.max_concurrent_per_source, 1);
        assert_eq!(config.max_concurrent_processors, 8);
    }

    #[test]
    fn test_report_partitions_statuses() {
        let mut statuses = BTreeMap::new();
        statuses.insert(
            "a".to_string(),
            ProcessorStatus::Succeeded {
                signals: 2,
                rejected: 0,
            },
        );
        statuses.insert("b".to_string(), ProcessorStatus::FetchFailed("503".to_string()));
        statuses.insert("c".to_string(), ProcessorStatus::TimedOut);

        let report = IngestionReport {
            company_id: "UBER".to_string(),
            generated: 2,
            inserted: 2,
            duplicates: 0,
            rejected: 0,
            statuses,
        };

        assert_eq!(report.succeeded(), vec!["a"]);
        let failures: Vec<&str> = report.failures().into_iter().map(|(t, _)| t).collect();
        assert_eq!(failures, vec!["b", "c"]);
    }

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_value(ProcessorStatus::Panicked("boom".to_string())).unwrap();
        assert_eq!(json["status"], "panicked");
        assert_eq!(json["detail"], "boom");
    }
}
