//! Shared kernel for the signal platform
//!
//! - Normalized `Signal` model and its invariants
//! - Companies and the explicit company registry
//! - Daily price model
//! - Storage traits with in-memory and PostgreSQL backends
//! - Configuration loading shared by the binaries

pub mod company;
pub mod config;
pub mod error;
pub mod market_data;
pub mod postgres;
pub mod signal;
pub mod storage;
pub mod summary;

pub use company::{Company, CompanyRegistry};
pub use config::{CompaniesSection, DatabaseConfig};
pub use error::{ConfigError, ValidationError};
pub use market_data::{DailyBar, DailyClose};
pub use postgres::{PgPriceStore, PgSignalStore};
pub use signal::{content_hash, score_from_normalized, DedupKey, RawData, Signal, SignalCategory, SignalMetadata};
pub use storage::{InMemoryPriceStore, InMemorySignalStore, PriceStore, SignalStore, StorageStats};
pub use summary::SignalSummary;

// Re-export for convenience
pub use chrono::{DateTime, NaiveDate, Utc};
