use thiserror::Error;

/// A signal that violates the model invariants. Always a processor bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{0} is not a finite number")]
    NonFinite(&'static str),

    #[error("normalized_value {0} outside [-1, 1]")]
    NormalizedOutOfRange(f64),

    #[error("score {0} outside [-100, 100]")]
    ScoreOutOfRange(i32),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("score {score} does not match normalized_value {normalized_value} (expected {expected})")]
    ScoreMismatch {
        score: i32,
        normalized_value: f64,
        expected: i32,
    },

    #[error("signal {field} '{actual}' does not match processor/company '{expected}'")]
    IdentityMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
}

/// Failure to load or interpret a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
