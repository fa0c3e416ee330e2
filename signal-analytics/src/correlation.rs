//! Correlation engine
//!
//! Pairwise, lag-aware correlation between the score series of a company's
//! signal types. A significant correlation at a positive lag marks the first
//! type as a leading indicator of the second.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use common::{Signal, SignalStore};

use crate::error::AnalysisError;
use crate::stats;

/// `[correlation]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Largest lead/lag tested, in observations
    #[serde(default = "default_max_lag")]
    pub max_lag: usize,

    /// Fewer aligned pairs than this are not tested
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    /// Default |r| threshold for leading indicators
    #[serde(default = "default_min_leading_correlation")]
    pub min_leading_correlation: f64,
}

fn default_max_lag() -> usize {
    4
}

fn default_min_observations() -> usize {
    8
}

fn default_significance_level() -> f64 {
    0.05
}

fn default_min_leading_correlation() -> f64 {
    0.5
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_lag: default_max_lag(),
            min_observations: default_min_observations(),
            significance_level: default_significance_level(),
            min_leading_correlation: default_min_leading_correlation(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
    Negligible,
}

impl Strength {
    pub fn from_coefficient(r: f64) -> Self {
        let abs = r.abs();
        if abs > 0.7 {
            Strength::Strong
        } else if abs > 0.4 {
            Strength::Moderate
        } else if abs > 0.2 {
            Strength::Weak
        } else {
            Strength::Negligible
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strength::Strong => "strong",
            Strength::Moderate => "moderate",
            Strength::Weak => "weak",
            Strength::Negligible => "negligible",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Positive => "positive",
            Direction::Negative => "negative",
        })
    }
}

/// Correlation of `signal_a` at time `t` with `signal_b` at `t + lag`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub signal_a: String,
    pub signal_b: String,
    pub lag: usize,
    pub correlation: f64,
    pub p_value: f64,
    pub n_observations: usize,
    /// Level the result was judged against
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
}

impl CorrelationResult {
    pub fn strength(&self) -> Strength {
        Strength::from_coefficient(self.correlation)
    }

    pub fn direction(&self) -> Direction {
        if self.correlation > 0.0 {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    /// Significant at the configured level
    pub fn is_significant(&self) -> bool {
        self.is_significant_at(self.significance_level)
    }

    pub fn is_significant_at(&self, level: f64) -> bool {
        self.p_value < level
    }
}

impl fmt::Display for CorrelationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lag = if self.lag > 0 {
            format!("leads by {} periods", self.lag)
        } else {
            "contemporaneous".to_string()
        };
        let significance = if self.is_significant() {
            "SIGNIFICANT"
        } else {
            "not significant"
        };
        write!(
            f,
            "{} → {}: {:+.3} ({} {}, {}) [{}, p={:.4}, n={}]",
            self.signal_a,
            self.signal_b,
            self.correlation,
            self.strength(),
            self.direction(),
            lag,
            significance,
            self.p_value,
            self.n_observations
        )
    }
}

/// `matrix[a][b]` = contemporaneous correlation, symmetric
pub type CorrelationMatrix = BTreeMap<String, BTreeMap<String, f64>>;

/// One time-ordered `(timestamp, score)` series per signal type. Repeated
/// timestamps keep the last observation.
pub fn build_series(signals: &[Signal]) -> BTreeMap<String, Vec<(DateTime<Utc>, f64)>> {
    let mut by_type: BTreeMap<String, BTreeMap<DateTime<Utc>, f64>> = BTreeMap::new();
    for signal in signals {
        by_type
            .entry(signal.signal_type.clone())
            .or_default()
            .insert(signal.timestamp, signal.score as f64);
    }
    by_type
        .into_iter()
        .map(|(signal_type, points)| (signal_type, points.into_iter().collect()))
        .collect()
}

/// Pair `a[i]` with `b[i + lag]`
pub fn align_by_lag(a: &[f64], b: &[f64], lag: usize) -> (Vec<f64>, Vec<f64>) {
    let n = a.len().min(b.len().saturating_sub(lag));
    (a[..n].to_vec(), b[lag..lag + n].to_vec())
}

/// Test one ordered pair at one lag. `None` when underpowered or undefined;
/// significance is not checked here.
pub fn test_pair(
    name_a: &str,
    name_b: &str,
    a: &[f64],
    b: &[f64],
    lag: usize,
    config: &CorrelationConfig,
) -> Option<CorrelationResult> {
    let (aligned_a, aligned_b) = align_by_lag(a, b, lag);
    if aligned_a.len() < config.min_observations {
        return None;
    }
    let result = stats::pearson(&aligned_a, &aligned_b)?;
    Some(CorrelationResult {
        signal_a: name_a.to_string(),
        signal_b: name_b.to_string(),
        lag,
        correlation: result.coefficient,
        p_value: result.p_value,
        n_observations: result.n,
        significance_level: config.significance_level,
    })
}

/// Significant correlations across every pair and lag, strongest first
pub fn analyze_series(
    series: &BTreeMap<String, Vec<(DateTime<Utc>, f64)>>,
    config: &CorrelationConfig,
) -> Vec<CorrelationResult> {
    let values: Vec<(&str, Vec<f64>)> = series
        .iter()
        .map(|(name, points)| (name.as_str(), points.iter().map(|(_, v)| *v).collect()))
        .collect();

    let mut results = Vec::new();
    let mut keep = |result: Option<CorrelationResult>| {
        if let Some(r) = result.filter(CorrelationResult::is_significant) {
            results.push(r);
        }
    };

    for (i, (name_a, a)) in values.iter().enumerate() {
        for (name_b, b) in &values[i + 1..] {
            keep(test_pair(name_a, name_b, a, b, 0, config));
            for lag in 1..=config.max_lag {
                keep(test_pair(name_a, name_b, a, b, lag, config));
                keep(test_pair(name_b, name_a, b, a, lag, config));
            }
        }
    }

    results.sort_by(|x, y| y.correlation.abs().total_cmp(&x.correlation.abs()));
    results
}

/// Results where something else leads `target` by at least one period
pub fn leading_indicators(
    results: &[CorrelationResult],
    target: &str,
    min_correlation: f64,
) -> Vec<CorrelationResult> {
    results
        .iter()
        .filter(|r| r.signal_b == target && r.lag > 0 && r.correlation.abs() >= min_correlation)
        .cloned()
        .collect()
}

/// Symmetric matrix of the lag-0 results
pub fn matrix_from(results: &[CorrelationResult]) -> CorrelationMatrix {
    let mut matrix = CorrelationMatrix::new();
    for r in results.iter().filter(|r| r.lag == 0) {
        matrix
            .entry(r.signal_a.clone())
            .or_default()
            .insert(r.signal_b.clone(), r.correlation);
        matrix
            .entry(r.signal_b.clone())
            .or_default()
            .insert(r.signal_a.clone(), r.correlation);
    }
    matrix
}

/// Correlation engine over the signal store
pub struct CorrelationEngine {
    store: Arc<dyn SignalStore>,
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(store: Arc<dyn SignalStore>, config: CorrelationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    async fn load_series(
        &self,
        company_id: &str,
    ) -> Result<BTreeMap<String, Vec<(DateTime<Utc>, f64)>>, AnalysisError> {
        let signals = self.store.query_by_company(company_id, None, None).await?;
        if signals.is_empty() {
            return Err(AnalysisError::NoSignals(company_id.to_string()));
        }
        debug!(company = company_id, signals = signals.len(), "Loaded signals");
        Ok(build_series(&signals))
    }

    /// All significant correlations for a company, strongest first
    pub async fn analyze_company(
        &self,
        company_id: &str,
    ) -> Result<Vec<CorrelationResult>, AnalysisError> {
        info!(company = company_id, "Analyzing signal correlations");
        let series = self.load_series(company_id).await?;
        let results = analyze_series(&series, &self.config);
        info!(
            company = company_id,
            signal_types = series.len(),
            significant = results.len(),
            "Correlation analysis complete"
        );
        Ok(results)
    }

    /// Signal types that lead `target`; `min_correlation` defaults to the
    /// configured threshold
    pub async fn find_leading_indicators(
        &self,
        company_id: &str,
        target: &str,
        min_correlation: Option<f64>,
    ) -> Result<Vec<CorrelationResult>, AnalysisError> {
        let threshold = min_correlation.unwrap_or(self.config.min_leading_correlation);
        let results = self.analyze_company(company_id).await?;
        Ok(leading_indicators(&results, target, threshold))
    }

    /// Contemporaneous correlation matrix
    pub async fn correlation_matrix(
        &self,
        company_id: &str,
    ) -> Result<CorrelationMatrix, AnalysisError> {
        let series = self.load_series(company_id).await?;
        let contemporaneous = CorrelationConfig {
            max_lag: 0,
            ..self.config.clone()
        };
        Ok(matrix_from(&analyze_series(&series, &contemporaneous)))
    }
}
