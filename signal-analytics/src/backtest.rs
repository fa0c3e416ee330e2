//! Backtest engine
//!
//! For every signal type of a ticker, measures what the stock did over the
//! next N trading days after each signal and whether that is distinguishable
//! from noise.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use common::{DailyClose, PriceStore, Signal, SignalCategory, SignalStore};

use crate::error::AnalysisError;
use crate::stats::{self, TTest};

/// Which test decides whether a signal type is predictive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceTest {
    /// One-sample t-test of signal returns against zero
    #[default]
    ZeroMean,
    /// Welch t-test of signal returns against all-days baseline returns
    VersusBaseline,
}

/// `[backtest]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Forward windows in trading days
    #[serde(default = "default_forward_windows")]
    pub forward_windows: Vec<usize>,

    /// Signal types with fewer observations are skipped
    #[serde(default = "default_min_signals")]
    pub min_signals: usize,

    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    #[serde(default)]
    pub significance_test: SignificanceTest,
}

fn default_forward_windows() -> Vec<usize> {
    vec![1, 5, 20, 60]
}

fn default_min_signals() -> usize {
    3
}

fn default_significance_level() -> f64 {
    0.05
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            forward_windows: default_forward_windows(),
            min_signals: default_min_signals(),
            significance_level: default_significance_level(),
            significance_test: SignificanceTest::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.forward_windows.is_empty() {
            return Err(AnalysisError::InvalidParameter(
                "forward_windows must not be empty".to_string(),
            ));
        }
        if self.forward_windows.contains(&0) {
            return Err(AnalysisError::InvalidParameter(
                "forward windows must be at least 1 trading day".to_string(),
            ));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "significance_level {} outside (0, 1)",
                self.significance_level
            )));
        }
        Ok(())
    }
}

/// Unconditional forward returns over every start day
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub avg: f64,
    pub median: f64,
    /// Population standard deviation
    pub std: f64,
    pub n: usize,
}

/// Statistics of one signal type over one forward window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub n: usize,
    pub hit_rate: f64,
    pub avg_return: f64,
    pub median_return: f64,
    /// Sample standard deviation
    pub std_return: f64,
    pub t_stat: f64,
    pub p_value: f64,
    /// Spearman correlation between score and forward return
    pub information_coefficient: f64,
    pub ic_p_value: f64,
    pub sharpe_like: f64,
    /// `avg_return` minus the baseline average for this window
    pub excess_return: f64,
    pub baseline_t_stat: f64,
    pub baseline_p_value: f64,
}

impl WindowStats {
    /// p-value selected by the configured test
    pub fn driving_p_value(&self, test: SignificanceTest) -> f64 {
        match test {
            SignificanceTest::ZeroMean => self.p_value,
            SignificanceTest::VersusBaseline => self.baseline_p_value,
        }
    }
}

/// Backtest outcome for one signal type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalTypeResult {
    pub signal_type: String,
    pub category: SignalCategory,
    pub n_signals: usize,
    pub window_stats: BTreeMap<usize, WindowStats>,
    pub best_window: Option<usize>,
    pub is_predictive: bool,
    /// p-value of `best_window` under the configured test
    pub best_p_value: f64,
}

/// Full backtest for one ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub ticker: String,
    pub date_range: (NaiveDate, NaiveDate),
    pub total_signals: usize,
    pub forward_windows: Vec<usize>,
    pub signal_results: BTreeMap<String, SignalTypeResult>,
    pub baseline_returns: BTreeMap<usize, BaselineStats>,
    pub generated_at: DateTime<Utc>,
}

impl BacktestReport {
    /// Predictive signal types, most significant first
    pub fn predictive_signals(&self) -> Vec<&SignalTypeResult> {
        let mut predictive: Vec<&SignalTypeResult> = self
            .signal_results
            .values()
            .filter(|r| r.is_predictive)
            .collect();
        predictive.sort_by(|a, b| a.best_p_value.total_cmp(&b.best_p_value));
        predictive
    }
}

/// Return from the first trading day on or after `date` to `window` sessions
/// later. `prices` must be sorted by date.
pub fn forward_return(prices: &[DailyClose], date: NaiveDate, window: usize) -> Option<f64> {
    let entry = prices.partition_point(|p| p.date < date);
    let exit = entry.checked_add(window)?;
    if exit >= prices.len() {
        return None;
    }
    let entry_close = prices[entry].close;
    if entry_close <= 0.0 {
        return None;
    }
    Some((prices[exit].close - entry_close) / entry_close)
}

/// Credit for one directional call: 1 when the return agrees with the score's
/// sign, 0.5 for a flat return, 0 otherwise. Neutral scores make no call.
pub fn hit_credit(score: i32, forward_return: f64) -> Option<f64> {
    if score == 0 {
        return None;
    }
    if forward_return == 0.0 {
        return Some(0.5);
    }
    let agrees = (score > 0) == (forward_return > 0.0);
    Some(if agrees { 1.0 } else { 0.0 })
}

/// Forward returns over every `(i, i + window)` pair of the series
pub fn baseline_returns(prices: &[DailyClose], window: usize) -> Vec<f64> {
    prices
        .iter()
        .zip(prices.iter().skip(window))
        .filter(|(entry, _)| entry.close > 0.0)
        .map(|(entry, exit)| (exit.close - entry.close) / entry.close)
        .collect()
}

fn summarize_baseline(returns: &[f64]) -> BaselineStats {
    BaselineStats {
        avg: stats::mean(returns),
        median: stats::median(returns),
        std: stats::population_std(returns),
        n: returns.len(),
    }
}

/// Backtest over in-memory data
///
/// `signals` may contain several types; `prices` need not be sorted.
pub fn backtest(
    ticker: &str,
    signals: &[Signal],
    prices: &[DailyClose],
    config: &BacktestConfig,
) -> Result<BacktestReport, AnalysisError> {
    config.validate()?;
    if signals.is_empty() {
        return Err(AnalysisError::NoSignals(ticker.to_string()));
    }
    if prices.is_empty() {
        return Err(AnalysisError::NoPriceData(ticker.to_string()));
    }

    let mut prices = prices.to_vec();
    prices.sort_by_key(|p| p.date);

    let mut baseline_series = BTreeMap::new();
    let mut baseline = BTreeMap::new();
    for &window in &config.forward_windows {
        let returns = baseline_returns(&prices, window);
        baseline.insert(window, summarize_baseline(&returns));
        baseline_series.insert(window, returns);
    }

    let mut by_type: BTreeMap<&str, Vec<&Signal>> = BTreeMap::new();
    for signal in signals {
        by_type.entry(&signal.signal_type).or_default().push(signal);
    }

    let mut signal_results = BTreeMap::new();
    for (signal_type, mut group) in by_type {
        if group.len() < config.min_signals {
            debug!(
                signal_type,
                signals = group.len(),
                min = config.min_signals,
                "Skipping signal type with too few signals"
            );
            continue;
        }
        group.sort_by_key(|s| s.timestamp);

        let analyzed =
            analyze_signal_type(signal_type, &group, &prices, &baseline, &baseline_series, config);
        if let Some(result) = analyzed {
            signal_results.insert(signal_type.to_string(), result);
        }
    }

    let date_range = match (prices.first(), prices.last()) {
        (Some(first), Some(last)) => (first.date, last.date),
        _ => return Err(AnalysisError::NoPriceData(ticker.to_string())),
    };

    let report = BacktestReport {
        ticker: ticker.to_string(),
        date_range,
        total_signals: signals.len(),
        forward_windows: config.forward_windows.clone(),
        signal_results,
        baseline_returns: baseline,
        generated_at: Utc::now(),
    };

    info!(
        ticker,
        analyzed = report.signal_results.len(),
        predictive = report.predictive_signals().len(),
        "Backtest complete"
    );

    Ok(report)
}

fn analyze_signal_type(
    signal_type: &str,
    group: &[&Signal],
    prices: &[DailyClose],
    baseline: &BTreeMap<usize, BaselineStats>,
    baseline_series: &BTreeMap<usize, Vec<f64>>,
    config: &BacktestConfig,
) -> Option<SignalTypeResult> {
    let category = group.first()?.category;
    let mut window_stats = BTreeMap::new();

    for &window in &config.forward_windows {
        let mut returns = Vec::new();
        let mut scores = Vec::new();
        for signal in group {
            if let Some(ret) = forward_return(prices, signal.timestamp.date_naive(), window) {
                returns.push(ret);
                scores.push(signal.score as f64);
            }
        }

        if returns.len() < 2 {
            debug!(signal_type, window, observations = returns.len(), "Skipping window");
            continue;
        }

        let credits: Vec<f64> = scores
            .iter()
            .zip(&returns)
            .filter_map(|(score, ret)| hit_credit(*score as i32, *ret))
            .collect();
        let hit_rate = if credits.is_empty() {
            0.0
        } else {
            credits.iter().sum::<f64>() / credits.len() as f64
        };

        let avg_return = stats::mean(&returns);
        let std_return = stats::sample_std(&returns);
        let zero_mean = stats::one_sample_t_test(&returns, 0.0).unwrap_or(TTest {
            t_stat: 0.0,
            p_value: 1.0,
        });
        let (information_coefficient, ic_p_value) = stats::spearman(&scores, &returns)
            .map(|c| (c.coefficient, c.p_value))
            .unwrap_or((0.0, 1.0));

        let window_baseline = baseline.get(&window).copied().unwrap_or_default();
        let versus_baseline = baseline_series
            .get(&window)
            .and_then(|all| stats::welch_t_test(&returns, all))
            .unwrap_or(TTest {
                t_stat: 0.0,
                p_value: 1.0,
            });

        window_stats.insert(
            window,
            WindowStats {
                n: returns.len(),
                hit_rate,
                avg_return,
                median_return: stats::median(&returns),
                std_return,
                t_stat: zero_mean.t_stat,
                p_value: zero_mean.p_value,
                information_coefficient,
                ic_p_value,
                sharpe_like: if std_return > 0.0 { avg_return / std_return } else { 0.0 },
                excess_return: avg_return - window_baseline.avg,
                baseline_t_stat: versus_baseline.t_stat,
                baseline_p_value: versus_baseline.p_value,
            },
        );
    }

    if window_stats.is_empty() {
        debug!(signal_type, "No window had enough observations");
        return None;
    }

    // First window wins ties
    let mut best: Option<(usize, f64)> = None;
    for (window, stat) in &window_stats {
        let p = stat.driving_p_value(config.significance_test);
        if best.map_or(true, |(_, best_p)| p < best_p) {
            best = Some((*window, p));
        }
    }
    let (best_window, best_p_value) = match best {
        Some((window, p)) => (Some(window), p),
        None => (None, 1.0),
    };

    Some(SignalTypeResult {
        signal_type: signal_type.to_string(),
        category,
        n_signals: group.len(),
        is_predictive: best_p_value < config.significance_level,
        window_stats,
        best_window,
        best_p_value,
    })
}

/// Backtest engine over the signal and price stores
pub struct BacktestEngine {
    signals: Arc<dyn SignalStore>,
    prices: Arc<dyn PriceStore>,
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(
        signals: Arc<dyn SignalStore>,
        prices: Arc<dyn PriceStore>,
        config: BacktestConfig,
    ) -> Self {
        Self {
            signals,
            prices,
            config,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Backtest every signal type stored under `company_id == ticker`
    pub async fn run(&self, ticker: &str) -> Result<BacktestReport, AnalysisError> {
        info!(ticker, windows = ?self.config.forward_windows, "Running backtest");

        let signals = self.signals.query_by_company(ticker, None, None).await?;
        let prices = self.prices.query_daily_closes(ticker, None).await?;
        debug!(ticker, signals = signals.len(), prices = prices.len(), "Loaded backtest inputs");

        backtest(ticker, &signals, &prices, &self.config)
    }
}
