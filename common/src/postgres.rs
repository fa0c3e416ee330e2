use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::market_data::{DailyBar, DailyClose};
use crate::signal::{Signal, SignalCategory, SignalMetadata};
use crate::storage::{PriceStore, SignalStore, StorageStats};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id UUID PRIMARY KEY,
    company_id TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    category TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    raw_value JSONB NOT NULL,
    normalized_value DOUBLE PRECISION NOT NULL CHECK (normalized_value BETWEEN -1 AND 1),
    score INTEGER NOT NULL CHECK (score BETWEEN -100 AND 100),
    confidence DOUBLE PRECISION NOT NULL CHECK (confidence BETWEEN 0 AND 1),
    source_name TEXT NOT NULL,
    source_url TEXT,
    processing_notes TEXT,
    raw_data_hash TEXT NOT NULL,
    fetch_duration_ms BIGINT,
    process_duration_ms BIGINT,
    description TEXT,
    tags TEXT[] NOT NULL DEFAULT '{}',
    CONSTRAINT uix_signal_dedup UNIQUE (company_id, signal_type, raw_data_hash)
);

CREATE INDEX IF NOT EXISTS idx_signals_company_timestamp ON signals(company_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_signals_company_type ON signals(company_id, signal_type);
CREATE INDEX IF NOT EXISTS idx_signals_type_timestamp ON signals(signal_type, timestamp);

CREATE TABLE IF NOT EXISTS stock_prices (
    ticker TEXT NOT NULL,
    date DATE NOT NULL,
    open DOUBLE PRECISION NOT NULL,
    high DOUBLE PRECISION NOT NULL,
    low DOUBLE PRECISION NOT NULL,
    close DOUBLE PRECISION NOT NULL,
    adj_close DOUBLE PRECISION,
    volume BIGINT NOT NULL,
    CONSTRAINT uix_ticker_date UNIQUE (ticker, date)
);
"#;

const SIGNAL_COLUMNS: &str = "company_id, signal_type, category, timestamp, ingested_at, raw_value, \
     normalized_value, score, confidence, source_name, source_url, processing_notes, \
     raw_data_hash, fetch_duration_ms, process_duration_ms, description, tags";

/// Connect a pool from the `[database]` config section.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// PostgreSQL-backed signal store.
///
/// Deduplication relies on the `uix_signal_dedup` unique constraint, so
/// overlapping orchestration runs stay idempotent without any locking here.
#[derive(Clone)]
pub struct PgSignalStore {
    pool: PgPool,
}

impl PgSignalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the signal and price tables if they do not exist yet
    pub async fn initialize(&self) -> Result<()> {
        initialize_schema(&self.pool).await
    }
}

pub async fn initialize_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("Failed to create signal tables")?;
    info!("Signal and price tables initialized");
    Ok(())
}

fn signal_query_sql() -> String {
    format!(
        "SELECT {SIGNAL_COLUMNS} FROM signals \
         WHERE company_id = $1 \
         AND ($2::TEXT IS NULL OR signal_type = $2) \
         AND ($3::TIMESTAMPTZ IS NULL OR timestamp >= $3) \
         ORDER BY timestamp ASC"
    )
}

fn duration_to_db(ms: Option<u64>) -> Option<i64> {
    ms.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

fn duration_from_db(ms: Option<i64>) -> Option<u64> {
    ms.and_then(|v| u64::try_from(v).ok())
}

fn signal_from_row(row: &PgRow) -> Result<Signal> {
    let category_name: String = row.try_get("category")?;
    let category = SignalCategory::parse(&category_name)
        .with_context(|| format!("Unknown signal category '{category_name}'"))?;
    let raw_value: Json<serde_json::Value> = row.try_get("raw_value")?;
    let tags: Vec<String> = row.try_get("tags")?;

    Ok(Signal {
        company_id: row.try_get("company_id")?,
        signal_type: row.try_get("signal_type")?,
        category,
        timestamp: row.try_get("timestamp")?,
        ingested_at: row.try_get("ingested_at")?,
        raw_value: raw_value.0,
        normalized_value: row.try_get("normalized_value")?,
        score: row.try_get("score")?,
        confidence: row.try_get("confidence")?,
        metadata: SignalMetadata {
            source_name: row.try_get("source_name")?,
            source_url: row.try_get("source_url")?,
            processing_notes: row.try_get("processing_notes")?,
            raw_data_hash: row.try_get("raw_data_hash")?,
            fetch_duration_ms: duration_from_db(row.try_get("fetch_duration_ms")?),
            process_duration_ms: duration_from_db(row.try_get("process_duration_ms")?),
        },
        description: row.try_get("description")?,
        tags: tags.into_iter().collect::<BTreeSet<_>>(),
    })
}

#[async_trait::async_trait]
impl SignalStore for PgSignalStore {
    async fn upsert_if_absent(&self, signal: &Signal) -> Result<bool> {
        let tags: Vec<String> = signal.tags.iter().cloned().collect();
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                id, company_id, signal_type, category, timestamp, ingested_at, raw_value,
                normalized_value, score, confidence, source_name, source_url, processing_notes,
                raw_data_hash, fetch_duration_ms, process_duration_ms, description, tags
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (company_id, signal_type, raw_data_hash) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&signal.company_id)
        .bind(&signal.signal_type)
        .bind(signal.category.as_str())
        .bind(signal.timestamp)
        .bind(signal.ingested_at)
        .bind(Json(&signal.raw_value))
        .bind(signal.normalized_value)
        .bind(signal.score)
        .bind(signal.confidence)
        .bind(&signal.metadata.source_name)
        .bind(&signal.metadata.source_url)
        .bind(&signal.metadata.processing_notes)
        .bind(&signal.metadata.raw_data_hash)
        .bind(duration_to_db(signal.metadata.fetch_duration_ms))
        .bind(duration_to_db(signal.metadata.process_duration_ms))
        .bind(&signal.description)
        .bind(tags)
        .execute(&self.pool)
        .await
        .context("Failed to insert signal")?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(
                company = %signal.company_id,
                signal_type = %signal.signal_type,
                "Signal already stored"
            );
        }
        Ok(inserted)
    }

    async fn query_by_company(
        &self,
        company_id: &str,
        signal_type: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&signal_query_sql())
            .bind(company_id)
            .bind(signal_type)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch signals")?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn stats(&self) -> Result<StorageStats> {
        let per_type = sqlx::query_as::<_, (String, i64)>(
            "SELECT signal_type, COUNT(*) FROM signals GROUP BY signal_type",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count signals")?;

        let (oldest, newest) = sqlx::query_as::<_, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)>(
            "SELECT MIN(timestamp), MAX(timestamp) FROM signals",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch signal time span")?;

        let signals_by_type = per_type
            .into_iter()
            .map(|(t, n)| (t, n.max(0) as usize))
            .collect::<std::collections::BTreeMap<_, _>>();

        Ok(StorageStats {
            total_signals: signals_by_type.values().sum(),
            signals_by_type,
            oldest_signal: oldest,
            newest_signal: newest,
        })
    }
}

/// PostgreSQL-backed daily price store
#[derive(Clone)]
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PriceStore for PgPriceStore {
    async fn query_daily_closes(
        &self,
        ticker: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<DailyClose>> {
        let (from, to) = match range {
            Some((from, to)) => (Some(from), Some(to)),
            None => (None, None),
        };

        let rows = sqlx::query_as::<_, (NaiveDate, f64)>(
            r#"
            SELECT date, COALESCE(adj_close, close)
            FROM stock_prices
            WHERE ticker = $1
            AND ($2::DATE IS NULL OR date >= $2)
            AND ($3::DATE IS NULL OR date <= $3)
            ORDER BY date ASC
            "#,
        )
        .bind(ticker)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch daily closes")?;

        Ok(rows
            .into_iter()
            .map(|(date, close)| DailyClose::new(date, close))
            .collect())
    }

    async fn upsert_daily_bars(&self, bars: &[DailyBar]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO stock_prices (ticker, date, open, high, low, close, adj_close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (ticker, date) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    adj_close = EXCLUDED.adj_close,
                    volume = EXCLUDED.volume
                "#,
            )
            .bind(&bar.ticker)
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.adj_close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert daily bar")?;
        }
        tx.commit().await?;

        info!("Upserted {} daily bars", bars.len());
        Ok(bars.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_dedup_constraint() {
        assert!(SCHEMA.contains("UNIQUE (company_id, signal_type, raw_data_hash)"));
        assert!(SCHEMA.contains("UNIQUE (ticker, date)"));
    }

    #[test]
    fn test_query_sql_selects_every_mapped_column() {
        let sql = signal_query_sql();
        for column in SIGNAL_COLUMNS.split(',').map(str::trim) {
            assert!(sql.contains(column), "missing column {column}");
        }
        assert!(sql.contains("ORDER BY timestamp ASC"));
    }

    #[test]
    fn test_duration_conversion() {
        assert_eq!(duration_to_db(Some(42)), Some(42));
        assert_eq!(duration_to_db(Some(u64::MAX)), Some(i64::MAX));
        assert_eq!(duration_from_db(Some(-1)), None);
        assert_eq!(duration_from_db(Some(7)), Some(7));
    }
}
