//! Daily price data used as the dependent variable in backtests

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Close adjusted for splits and dividends, when the source provides it
    pub adj_close: Option<f64>,
    pub volume: i64,
}

impl DailyBar {
    /// Close used for return calculations: adjusted when available.
    pub fn effective_close(&self) -> f64 {
        self.adj_close.unwrap_or(self.close)
    }

    pub fn to_close(&self) -> DailyClose {
        DailyClose {
            date: self.date,
            close: self.effective_close(),
        }
    }
}

/// One trading day's close
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

impl DailyClose {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }
}
