use thiserror::Error;

/// Why an analysis could not be produced at all
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("no price data for {0}")]
    NoPriceData(String),

    #[error("no signals for {0}")]
    NoSignals(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}
