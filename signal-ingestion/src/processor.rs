//! Base Processor trait and core processor types
//!
//! Every data source implements [`Processor`]. The orchestrator only ever talks
//! to this trait: it asks whether a processor applies to a company, then calls
//! [`Processor::run`] under the source's rate limit to get validated signals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

use common::{Company, RawData, Signal, SignalCategory, ValidationError};

/// How often the underlying source publishes new data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    Realtime,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCost {
    Free,
    Freemium,
    Paid,
}

/// Implementation difficulty of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Static description of a processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorMetadata {
    /// Unique key, also the `signal_type` of every produced signal
    pub signal_type: String,
    pub category: SignalCategory,
    pub description: String,
    pub update_frequency: UpdateFrequency,
    /// Name of the external source. Processors sharing a source share its
    /// rate limit in the orchestrator.
    pub data_source: String,
    pub cost: DataCost,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
}

/// Failure of a single processor run
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// The source could not be reached or returned something unusable
    #[error("{signal_type}: fetch failed: {source:#}")]
    Fetch {
        signal_type: String,
        #[source]
        source: anyhow::Error,
    },

    /// The processor could not interpret data it fetched
    #[error("{signal_type}: processing failed: {source:#}")]
    Process {
        signal_type: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ProcessorError {
    pub fn signal_type(&self) -> &str {
        match self {
            ProcessorError::Fetch { signal_type, .. } | ProcessorError::Process { signal_type, .. } => {
                signal_type
            }
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, ProcessorError::Fetch { .. })
    }
}

/// Signals surviving validation plus the number dropped
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutcome {
    pub signals: Vec<Signal>,
    pub rejected: usize,
}

/// Base trait that all data-source processors must implement
#[async_trait]
pub trait Processor: Send + Sync {
    /// Static metadata; no I/O
    fn metadata(&self) -> &ProcessorMetadata;

    /// Whether this source has anything to say about the company; no I/O
    fn is_applicable(&self, company: &Company) -> bool;

    /// Pull raw data for `[start, end)` from the source
    async fn fetch(
        &self,
        company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<RawData>;

    /// Turn raw data into signals. Pure and deterministic for a given payload.
    fn process(&self, company: &Company, raw: &RawData) -> anyhow::Result<Vec<Signal>>;

    /// Check a produced signal before it leaves the processor
    ///
    /// Default: model invariants plus identity against this processor and the
    /// company. Override to add source-specific checks.
    fn validate_signal(&self, company: &Company, signal: &Signal) -> Result<(), ValidationError> {
        signal.validate()?;

        let signal_type = &self.metadata().signal_type;
        if &signal.signal_type != signal_type {
            return Err(ValidationError::IdentityMismatch {
                field: "signal_type",
                expected: signal_type.clone(),
                actual: signal.signal_type.clone(),
            });
        }
        if signal.company_id != company.id {
            return Err(ValidationError::IdentityMismatch {
                field: "company_id",
                expected: company.id.clone(),
                actual: signal.company_id.clone(),
            });
        }
        Ok(())
    }

    /// Fetch, process and validate in one go
    ///
    /// Returns an empty outcome when the processor does not apply.
    async fn run(
        &self,
        company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ProcessorOutcome, ProcessorError> {
        if !self.is_applicable(company) {
            return Ok(ProcessorOutcome::default());
        }

        let started = Instant::now();
        let raw = self
            .fetch(company, start, end)
            .await
            .map_err(|source| ProcessorError::Fetch {
                signal_type: self.metadata().signal_type.clone(),
                source,
            })?;
        let fetch_ms = started.elapsed().as_millis() as u64;

        process_and_validate(self, company, &raw, fetch_ms)
    }
}

/// Second half of a run: process fetched data, stamp timings and drop invalid
/// signals. Used by the default [`Processor::run`]; processors overriding
/// `run` can reuse it after their own fetch.
pub fn process_and_validate<P: Processor + ?Sized>(
    processor: &P,
    company: &Company,
    raw: &RawData,
    fetch_ms: u64,
) -> Result<ProcessorOutcome, ProcessorError> {
    let signal_type = &processor.metadata().signal_type;

    let started = Instant::now();
    let produced = processor
        .process(company, raw)
        .map_err(|source| ProcessorError::Process {
            signal_type: signal_type.clone(),
            source,
        })?;
    let process_ms = started.elapsed().as_millis() as u64;

    let mut outcome = ProcessorOutcome::default();
    for mut signal in produced {
        if let Err(e) = processor.validate_signal(company, &signal) {
            error!(
                processor = %signal_type,
                company = %company.id,
                "Rejected invalid signal: {}",
                e
            );
            outcome.rejected += 1;
            continue;
        }
        signal.metadata.fetch_duration_ms = Some(fetch_ms);
        signal.metadata.process_duration_ms = Some(process_ms);
        outcome.signals.push(signal);
    }

    debug!(
        processor = %signal_type,
        company = %company.id,
        signals = outcome.signals.len(),
        rejected = outcome.rejected,
        fetch_ms,
        process_ms,
        "Processor run complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use common::SignalMetadata;
    use serde_json::json;

    struct FixedProcessor {
        metadata: ProcessorMetadata,
        fail_fetch: bool,
        wrong_company: bool,
    }

    impl FixedProcessor {
        fn new() -> Self {
            Self {
                metadata: ProcessorMetadata {
                    signal_type: "fixed".to_string(),
                    category: SignalCategory::Alternative,
                    description: "Fixed test source".to_string(),
                    update_frequency: UpdateFrequency::Daily,
                    data_source: "fixture".to_string(),
                    cost: DataCost::Free,
                    difficulty: Difficulty::Easy,
                    tags: vec![],
                },
                fail_fetch: false,
                wrong_company: false,
            }
        }
    }

    #[async_trait]
    impl Processor for FixedProcessor {
        fn metadata(&self) -> &ProcessorMetadata {
            &self.metadata
        }

        fn is_applicable(&self, company: &Company) -> bool {
            company.is_public_company
        }

        async fn fetch(
            &self,
            _company: &Company,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> anyhow::Result<RawData> {
            if self.fail_fetch {
                return Err(anyhow!("source unavailable"));
            }
            Ok(json!({ "values": [0.2, 0.5] }))
        }

        fn process(&self, company: &Company, raw: &RawData) -> anyhow::Result<Vec<Signal>> {
            let values = raw["values"]
                .as_array()
                .ok_or_else(|| anyhow!("missing values"))?;
            let ts = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
            let company_id = if self.wrong_company { "OTHER" } else { company.id.as_str() };

            let mut signals = Vec::new();
            for value in values {
                let v = value.as_f64().unwrap_or_default();
                signals.push(Signal::new(
                    company_id,
                    "fixed",
                    SignalCategory::Alternative,
                    ts,
                    json!({ "v": v }),
                    v,
                    0.5,
                    SignalMetadata::new("fixture"),
                )?);
            }
            // One deliberately broken signal
            let mut broken = signals[0].clone();
            broken.score = 99;
            signals.push(broken);
            Ok(signals)
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        (start, start + chrono::Duration::days(7))
    }

    #[tokio::test]
    async fn test_run_drops_invalid_and_stamps_timings() {
        let processor = FixedProcessor::new();
        let (start, end) = window();
        let outcome = processor
            .run(&Company::new("UBER", "Uber"), start, end)
            .await
            .unwrap();

        assert_eq!(outcome.signals.len(), 2);
        assert_eq!(outcome.rejected, 1);
        assert!(outcome
            .signals
            .iter()
            .all(|s| s.metadata.fetch_duration_ms.is_some() && s.metadata.process_duration_ms.is_some()));
    }

    #[tokio::test]
    async fn test_run_not_applicable_is_empty() {
        let processor = FixedProcessor::new();
        let mut company = Company::new("PRIV", "Private Co");
        company.is_public_company = false;
        let (start, end) = window();

        let outcome = processor.run(&company, start, end).await.unwrap();
        assert!(outcome.signals.is_empty());
        assert_eq!(outcome.rejected, 0);
    }

    #[tokio::test]
    async fn test_fetch_error_is_distinguishable() {
        let mut processor = FixedProcessor::new();
        processor.fail_fetch = true;
        let (start, end) = window();

        let err = processor
            .run(&Company::new("UBER", "Uber"), start, end)
            .await
            .unwrap_err();
        assert!(err.is_fetch());
        assert_eq!(err.signal_type(), "fixed");
    }

    #[tokio::test]
    async fn test_identity_mismatch_rejected() {
        let mut processor = FixedProcessor::new();
        processor.wrong_company = true;
        let (start, end) = window();

        let outcome = processor
            .run(&Company::new("UBER", "Uber"), start, end)
            .await
            .unwrap();
        assert!(outcome.signals.is_empty());
        assert_eq!(outcome.rejected, 3);
    }
}
