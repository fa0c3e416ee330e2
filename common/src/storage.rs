// Signal & Price Storage Interface
// Persistence boundary for the orchestrator (writes) and the analytics engines (reads)

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::market_data::{DailyBar, DailyClose};
use crate::signal::{DedupKey, Signal};

/// Trait for signal storage backends
///
/// Implementations must make `upsert_if_absent` atomic with respect to the
/// dedup key `(company_id, signal_type, raw_data_hash)`: two concurrent
/// orchestration runs for the same company must never both insert the same
/// signal.
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert the signal unless one with the same dedup key exists.
    /// Returns `true` when a row was inserted.
    async fn upsert_if_absent(&self, signal: &Signal) -> Result<bool>;

    /// Signals for a company ordered by timestamp, optionally filtered by
    /// type and by `timestamp >= since`.
    async fn query_by_company(
        &self,
        company_id: &str,
        signal_type: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Signal>>;

    /// Get storage statistics
    async fn stats(&self) -> Result<StorageStats>;
}

/// Trait for daily price storage backends
#[async_trait::async_trait]
pub trait PriceStore: Send + Sync {
    /// Daily closes for a ticker in ascending date order. `range` is inclusive.
    async fn query_daily_closes(
        &self,
        ticker: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<DailyClose>>;

    /// Insert or replace bars keyed by `(ticker, date)`. Returns rows written.
    async fn upsert_daily_bars(&self, bars: &[DailyBar]) -> Result<usize>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_signals: usize,
    pub signals_by_type: BTreeMap<String, usize>,
    pub oldest_signal: Option<DateTime<Utc>>,
    pub newest_signal: Option<DateTime<Utc>>,
}

/// In-memory signal storage (for testing and development)
pub struct InMemorySignalStore {
    signals: RwLock<HashMap<DedupKey, Signal>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.signals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.signals.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self.signals.read().await.values().cloned().collect();
        signals.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        signals
    }
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SignalStore for InMemorySignalStore {
    async fn upsert_if_absent(&self, signal: &Signal) -> Result<bool> {
        // Check and insert under one write guard
        let mut signals = self.signals.write().await;
        let key = signal.dedup_key();
        if signals.contains_key(&key) {
            return Ok(false);
        }
        signals.insert(key, signal.clone());
        Ok(true)
    }

    async fn query_by_company(
        &self,
        company_id: &str,
        signal_type: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        let mut matching: Vec<Signal> = signals
            .values()
            .filter(|s| s.company_id == company_id)
            .filter(|s| signal_type.map_or(true, |t| s.signal_type == t))
            .filter(|s| since.map_or(true, |ts| s.timestamp >= ts))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matching)
    }

    async fn stats(&self) -> Result<StorageStats> {
        let signals = self.signals.read().await;

        let mut stats = StorageStats {
            total_signals: signals.len(),
            ..Default::default()
        };

        for signal in signals.values() {
            *stats
                .signals_by_type
                .entry(signal.signal_type.clone())
                .or_insert(0) += 1;

            if stats.oldest_signal.map_or(true, |ts| signal.timestamp < ts) {
                stats.oldest_signal = Some(signal.timestamp);
            }
            if stats.newest_signal.map_or(true, |ts| signal.timestamp > ts) {
                stats.newest_signal = Some(signal.timestamp);
            }
        }

        Ok(stats)
    }
}

/// In-memory price storage (for testing and development)
#[derive(Default)]
pub struct InMemoryPriceStore {
    bars: RwLock<HashMap<String, BTreeMap<NaiveDate, DailyBar>>>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience loader: one bar per `(date, close)` with OHLC all equal to close.
    pub async fn insert_closes(&self, ticker: &str, closes: &[(NaiveDate, f64)]) {
        let bars: Vec<DailyBar> = closes
            .iter()
            .map(|(date, close)| DailyBar {
                ticker: ticker.to_string(),
                date: *date,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                adj_close: None,
                volume: 0,
            })
            .collect();
        let mut store = self.bars.write().await;
        let series = store.entry(ticker.to_string()).or_default();
        for bar in bars {
            series.insert(bar.date, bar);
        }
    }
}

#[async_trait::async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn query_daily_closes(
        &self,
        ticker: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<DailyClose>> {
        let store = self.bars.read().await;
        let Some(series) = store.get(ticker) else {
            return Ok(Vec::new());
        };

        let closes = series
            .values()
            .filter(|bar| range.map_or(true, |(from, to)| bar.date >= from && bar.date <= to))
            .map(DailyBar::to_close)
            .collect();
        Ok(closes)
    }

    async fn upsert_daily_bars(&self, bars: &[DailyBar]) -> Result<usize> {
        let mut store = self.bars.write().await;
        for bar in bars {
            store
                .entry(bar.ticker.clone())
                .or_default()
                .insert(bar.date, bar.clone());
        }
        Ok(bars.len())
    }
}
