//! Signal analytics
//!
//! Read-only analysis over persisted signals:
//! - Backtesting signal types against forward stock returns
//! - Lead-lag correlation between signal types of one company

pub mod backtest;
pub mod correlation;
pub mod error;
pub mod stats;

pub use backtest::{
    BacktestConfig, BacktestEngine, BacktestReport, BaselineStats, SignalTypeResult,
    SignificanceTest, WindowStats,
};
pub use correlation::{
    CorrelationConfig, CorrelationEngine, CorrelationMatrix, CorrelationResult, Direction,
    Strength,
};
pub use error::AnalysisError;
