//! Backtest and correlation scenarios against the in-memory stores

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use common::{
    InMemoryPriceStore, InMemorySignalStore, Signal, SignalCategory, SignalMetadata, SignalStore,
};
use signal_analytics::{
    AnalysisError, BacktestConfig, BacktestEngine, CorrelationConfig, CorrelationEngine,
    SignificanceTest,
};

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(n)
}

fn at(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap() + Duration::days(n)
}

fn signal(company: &str, signal_type: &str, n: i64, normalized: f64, nonce: usize) -> Signal {
    Signal::new(
        company,
        signal_type,
        SignalCategory::Alternative,
        at(n),
        json!({ "day": n, "value": normalized, "nonce": nonce }),
        normalized,
        0.7,
        SignalMetadata::new("fixture"),
    )
    .unwrap()
}

async fn store_with(signals: Vec<Signal>) -> Arc<InMemorySignalStore> {
    let store = Arc::new(InMemorySignalStore::new());
    for s in &signals {
        assert!(store.upsert_if_absent(s).await.unwrap());
    }
    store
}

async fn prices_with(ticker: &str, closes: &[f64]) -> Arc<InMemoryPriceStore> {
    let prices = Arc::new(InMemoryPriceStore::new());
    let rows: Vec<(NaiveDate, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| (day(i as i64), *c))
        .collect();
    prices.insert_closes(ticker, &rows).await;
    prices
}

#[tokio::test]
async fn alternating_sentiment_over_flat_prices_is_not_predictive() {
    let signals = (0..10)
        .map(|i| {
            let value = if i % 2 == 0 { 0.6 } else { -0.6 };
            signal("UBER", "sentiment", i, value, 0)
        })
        .collect();
    let store = store_with(signals).await;
    let prices = prices_with("UBER", &[100.0; 120]).await;

    let engine = BacktestEngine::new(store, prices, BacktestConfig::default());
    let report = engine.run("UBER").await.unwrap();

    assert_eq!(report.total_signals, 10);
    let result = &report.signal_results["sentiment"];
    assert!(!result.is_predictive);
    assert_eq!(result.window_stats.len(), 4);
    for stats in result.window_stats.values() {
        assert_eq!(stats.n, 10);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.avg_return, 0.0);
        assert_eq!(stats.p_value, 1.0);
        assert_eq!(stats.information_coefficient, 0.0);
        assert_eq!(stats.ic_p_value, 1.0);
        assert_eq!(stats.sharpe_like, 0.0);
    }
    assert!(report.predictive_signals().is_empty());
    assert_eq!(report.baseline_returns[&1].n, 119);
}

#[tokio::test]
async fn forward_returns_match_known_prices() {
    // Two identical calls on day 0 so each window has two observations
    let store = store_with(vec![
        signal("TSLA", "news", 0, 0.8, 1),
        signal("TSLA", "news", 0, 0.8, 2),
    ])
    .await;
    let prices = prices_with("TSLA", &[100.0, 102.0, 99.0, 105.0, 110.0, 108.0]).await;

    let config = BacktestConfig {
        forward_windows: vec![2, 4],
        min_signals: 1,
        ..Default::default()
    };
    let report = BacktestEngine::new(store, prices, config)
        .run("TSLA")
        .await
        .unwrap();

    let result = &report.signal_results["news"];
    let w2 = &result.window_stats[&2];
    let w4 = &result.window_stats[&4];

    assert!((w2.avg_return - (-0.01)).abs() < 1e-12);
    assert_eq!(w2.hit_rate, 0.0);
    assert!((w4.avg_return - 0.10).abs() < 1e-12);
    assert_eq!(w4.hit_rate, 1.0);

    assert_eq!(report.date_range, (day(0), day(5)));
}

#[tokio::test]
async fn window_without_enough_observations_is_skipped() {
    // Signal late in the series: only the 1-day window fits for both
    let store = store_with(vec![
        signal("MSFT", "late", 7, 0.4, 0),
        signal("MSFT", "late", 8, 0.5, 0),
        signal("MSFT", "late", 8, -0.2, 1),
        // Below min_signals
        signal("MSFT", "rare", 0, 0.9, 0),
        signal("MSFT", "rare", 1, 0.9, 0),
    ])
    .await;
    let prices =
        prices_with("MSFT", &[10.0, 11.0, 12.0, 11.0, 10.0, 11.0, 12.0, 13.0, 12.0, 12.5]).await;

    let config = BacktestConfig {
        forward_windows: vec![1, 5],
        ..Default::default()
    };
    let report = BacktestEngine::new(store, prices, config)
        .run("MSFT")
        .await
        .unwrap();

    assert!(!report.signal_results.contains_key("rare"));
    let late = &report.signal_results["late"];
    assert_eq!(late.window_stats.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(late.window_stats[&1].n, 3);
}

#[tokio::test]
async fn versus_baseline_test_drives_predictiveness() {
    // Price doubles every day: every signal return equals the baseline return
    let closes: Vec<f64> = (0..40).map(|i| 2f64.powi(i)).collect();
    let signals = (0..10).map(|i| signal("AAPL", "buzz", i * 2, 0.5, 0)).collect();
    let store = store_with(signals).await;
    let prices = prices_with("AAPL", &closes).await;

    let zero_mean = BacktestEngine::new(
        store.clone(),
        prices.clone(),
        BacktestConfig {
            forward_windows: vec![1],
            ..Default::default()
        },
    )
    .run("AAPL")
    .await
    .unwrap();
    let versus_baseline = BacktestEngine::new(
        store,
        prices,
        BacktestConfig {
            forward_windows: vec![1],
            significance_test: SignificanceTest::VersusBaseline,
            ..Default::default()
        },
    )
    .run("AAPL")
    .await
    .unwrap();

    // Positive drift is significant against zero but not against the market
    assert!(zero_mean.signal_results["buzz"].is_predictive);
    assert!(!versus_baseline.signal_results["buzz"].is_predictive);
    let stats = &versus_baseline.signal_results["buzz"].window_stats[&1];
    assert!(stats.excess_return.abs() < 1e-9);
}

#[tokio::test]
async fn backtest_requires_data() {
    let empty = Arc::new(InMemorySignalStore::new());
    let prices = prices_with("UBER", &[1.0, 2.0, 3.0]).await;
    let err = BacktestEngine::new(empty, prices, BacktestConfig::default())
        .run("UBER")
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::NoSignals(_)));

    let store = store_with(vec![signal("UBER", "x", 0, 0.1, 0)]).await;
    let no_prices = Arc::new(InMemoryPriceStore::new());
    let err = BacktestEngine::new(store, no_prices, BacktestConfig::default())
        .run("UBER")
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::NoPriceData(_)));
}

fn paired_series(company: &str, points: usize) -> Vec<Signal> {
    let a = [0.1, -0.2, 0.3, -0.05, 0.4, 0.0, 0.25, -0.15, 0.35];
    let mut signals = Vec::new();
    for (i, v) in a.iter().take(points).enumerate() {
        signals.push(signal(company, "job_postings", i as i64, *v, 0));
        signals.push(signal(company, "web_traffic", i as i64, v * 2.0, 0));
    }
    signals
}

#[tokio::test]
async fn correlation_needs_min_observations() {
    let config = CorrelationConfig {
        min_observations: 8,
        ..Default::default()
    };

    let seven = CorrelationEngine::new(store_with(paired_series("LYFT", 7)).await, config.clone());
    assert!(seven.analyze_company("LYFT").await.unwrap().is_empty());

    let eight = CorrelationEngine::new(store_with(paired_series("LYFT", 8)).await, config);
    let results = eight.analyze_company("LYFT").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].lag, 0);
    assert_eq!(results[0].n_observations, 8);
    assert!(results[0].correlation > 0.999);

    let matrix = eight.correlation_matrix("LYFT").await.unwrap();
    assert_eq!(matrix["job_postings"]["web_traffic"], matrix["web_traffic"]["job_postings"]);
}

#[tokio::test]
async fn leading_indicator_found_at_positive_lag() {
    let lead = [0.1, -0.3, 0.5, 0.2, -0.4, 0.6, -0.1, 0.3, -0.5, 0.4, 0.0, -0.2];
    let mut signals = Vec::new();
    for (i, v) in lead.iter().enumerate() {
        signals.push(signal("ABNB", "hiring", i as i64, *v, 0));
        // revenue echoes hiring one period later
        let echoed = if i == 0 { 0.05 } else { lead[i - 1] };
        signals.push(signal("ABNB", "revenue_proxy", i as i64, echoed, 0));
    }

    let engine = CorrelationEngine::new(store_with(signals).await, CorrelationConfig::default());

    let leading = engine
        .find_leading_indicators("ABNB", "revenue_proxy", None)
        .await
        .unwrap();
    assert!(!leading.is_empty());
    assert!(leading.iter().all(|r| r.lag > 0 && r.signal_b == "revenue_proxy"));

    let top = &leading[0];
    assert_eq!(top.signal_a, "hiring");
    assert_eq!(top.lag, 1);
    assert!(top.correlation > 0.999);
    assert_eq!(top.n_observations, 11);
}

#[tokio::test]
async fn correlation_without_signals_is_an_error() {
    let engine = CorrelationEngine::new(
        Arc::new(InMemorySignalStore::new()),
        CorrelationConfig::default(),
    );
    assert!(matches!(
        engine.analyze_company("NOPE").await,
        Err(AnalysisError::NoSignals(_))
    ));
}
