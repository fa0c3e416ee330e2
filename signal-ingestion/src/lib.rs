//! Signal ingestion
//!
//! Processors turn external data sources into normalized signals; the
//! orchestrator runs them concurrently per company and persists the results
//! exactly once.

pub mod orchestrator;
pub mod processor;
pub mod processors;
pub mod registry;

pub use orchestrator::{
    CollectedSignals, IngestionReport, Orchestrator, OrchestratorConfig, ProcessorStatus,
    StoreSummary,
};
pub use processor::{
    process_and_validate, DataCost, Difficulty, Processor, ProcessorError, ProcessorMetadata,
    ProcessorOutcome, UpdateFrequency,
};
pub use processors::{default_registry, WikipediaPageviewsProcessor};
pub use registry::ProcessorRegistry;
