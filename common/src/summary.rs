//! Aggregated view of a company's signals of one type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    pub company_id: String,
    pub signal_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_signals: usize,
    pub avg_score: f64,
    pub avg_confidence: f64,
    pub bullish_signals: usize,
    pub bearish_signals: usize,
    pub neutral_signals: usize,
    /// Highest absolute score
    pub strongest_signal: Option<Signal>,
    pub latest_signal: Option<Signal>,
}

impl SignalSummary {
    /// Summarize the signals of `signal_type` for `company_id` that fall in
    /// `[start, end]`. Signals of other companies/types are ignored.
    pub fn build(
        company_id: &str,
        signal_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        signals: &[Signal],
    ) -> Self {
        let matching: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.company_id == company_id && s.signal_type == signal_type)
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .collect();

        let total = matching.len();
        let (avg_score, avg_confidence) = if total == 0 {
            (0.0, 0.0)
        } else {
            let score_sum: f64 = matching.iter().map(|s| s.score as f64).sum();
            let conf_sum: f64 = matching.iter().map(|s| s.confidence).sum();
            (score_sum / total as f64, conf_sum / total as f64)
        };

        let strongest_signal = matching
            .iter()
            .max_by_key(|s| s.score.abs())
            .map(|s| (*s).clone());
        let latest_signal = matching
            .iter()
            .max_by_key(|s| s.timestamp)
            .map(|s| (*s).clone());

        Self {
            company_id: company_id.to_string(),
            signal_type: signal_type.to_string(),
            start_date: start,
            end_date: end,
            total_signals: total,
            avg_score,
            avg_confidence,
            bullish_signals: matching.iter().filter(|s| s.is_bullish()).count(),
            bearish_signals: matching.iter().filter(|s| s.is_bearish()).count(),
            neutral_signals: matching.iter().filter(|s| s.score == 0).count(),
            strongest_signal,
            latest_signal,
        }
    }
}
