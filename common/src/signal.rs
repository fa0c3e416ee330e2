//! Normalized signal model
//!
//! Every processor converts its source-specific payload into one or more
//! [`Signal`]s. A signal carries two views of the same directional strength
//! (`normalized_value` in [-1, 1] and `score` in [-100, 100]) which must agree
//! at creation time, plus a content hash of the raw payload used for
//! deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ValidationError;

/// Schema-free raw payload as returned by a processor's fetch step.
pub type RawData = serde_json::Value;

/// Signal category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Regulatory,
    Workforce,
    WebDigital,
    Geospatial,
    Product,
    GovernmentData,
    Financial,
    Alternative,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 8] = [
        SignalCategory::Regulatory,
        SignalCategory::Workforce,
        SignalCategory::WebDigital,
        SignalCategory::Geospatial,
        SignalCategory::Product,
        SignalCategory::GovernmentData,
        SignalCategory::Financial,
        SignalCategory::Alternative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Regulatory => "regulatory",
            SignalCategory::Workforce => "workforce",
            SignalCategory::WebDigital => "web_digital",
            SignalCategory::Geospatial => "geospatial",
            SignalCategory::Product => "product",
            SignalCategory::GovernmentData => "government_data",
            SignalCategory::Financial => "financial",
            SignalCategory::Alternative => "alternative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance attached to every signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetadata {
    pub source_name: String,
    pub source_url: Option<String>,
    pub processing_notes: Option<String>,
    /// Content hash of `raw_value`; part of the dedup key.
    pub raw_data_hash: String,
    pub fetch_duration_ms: Option<u64>,
    pub process_duration_ms: Option<u64>,
}

impl SignalMetadata {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            source_url: None,
            processing_notes: None,
            raw_data_hash: String::new(),
            fetch_duration_ms: None,
            process_duration_ms: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.processing_notes = Some(notes.into());
        self
    }
}

/// A single normalized, timestamped observation for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub company_id: String,
    pub signal_type: String,
    pub category: SignalCategory,
    /// When the underlying event occurred.
    pub timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub raw_value: RawData,
    pub normalized_value: f64, // -1.0 (max bearish) to 1.0 (max bullish)
    pub score: i32,            // -100 to 100
    pub confidence: f64,       // 0.0 to 1.0
    pub metadata: SignalMetadata,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
}

/// Key under which persisted signals are deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub company_id: String,
    pub signal_type: String,
    pub raw_data_hash: String,
}

impl Signal {
    /// Build a signal, deriving `score` from `normalized_value` and the
    /// content hash from `raw_value` (unless the metadata already carries one).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        company_id: impl Into<String>,
        signal_type: impl Into<String>,
        category: SignalCategory,
        timestamp: DateTime<Utc>,
        raw_value: RawData,
        normalized_value: f64,
        confidence: f64,
        mut metadata: SignalMetadata,
    ) -> Result<Self, ValidationError> {
        if !normalized_value.is_finite() {
            return Err(ValidationError::NonFinite("normalized_value"));
        }
        if metadata.raw_data_hash.is_empty() {
            metadata.raw_data_hash = content_hash(&raw_value);
        }

        let signal = Self {
            company_id: company_id.into(),
            signal_type: signal_type.into(),
            category,
            timestamp,
            ingested_at: Utc::now(),
            raw_value,
            normalized_value,
            score: score_from_normalized(normalized_value),
            confidence,
            metadata,
            description: None,
            tags: BTreeSet::new(),
        };
        signal.validate()?;
        Ok(signal)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Check every value invariant of the model.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.company_id.trim().is_empty() {
            return Err(ValidationError::MissingField("company_id"));
        }
        if self.signal_type.trim().is_empty() {
            return Err(ValidationError::MissingField("signal_type"));
        }
        if self.metadata.raw_data_hash.is_empty() {
            return Err(ValidationError::MissingField("metadata.raw_data_hash"));
        }
        if !self.normalized_value.is_finite() {
            return Err(ValidationError::NonFinite("normalized_value"));
        }
        if !self.confidence.is_finite() {
            return Err(ValidationError::NonFinite("confidence"));
        }
        if !(-1.0..=1.0).contains(&self.normalized_value) {
            return Err(ValidationError::NormalizedOutOfRange(self.normalized_value));
        }
        if !(-100..=100).contains(&self.score) {
            return Err(ValidationError::ScoreOutOfRange(self.score));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(self.confidence));
        }
        let expected = score_from_normalized(self.normalized_value);
        if expected != self.score {
            return Err(ValidationError::ScoreMismatch {
                score: self.score,
                normalized_value: self.normalized_value,
                expected,
            });
        }
        Ok(())
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            company_id: self.company_id.clone(),
            signal_type: self.signal_type.clone(),
            raw_data_hash: self.metadata.raw_data_hash.clone(),
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.score > 0
    }

    pub fn is_bearish(&self) -> bool {
        self.score < 0
    }
}

/// `round(normalized * 100)`, rounding half away from zero.
pub fn score_from_normalized(normalized_value: f64) -> i32 {
    (normalized_value * 100.0).round() as i32
}

/// Lowercase hex SHA-256 of the canonical JSON encoding of `value`.
///
/// `serde_json::Map` keeps keys sorted, so equal trees always serialize to
/// the same bytes regardless of the order fields were inserted in.
pub fn content_hash(value: &RawData) -> String {
    let canonical = value.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(normalized: f64) -> Result<Signal, ValidationError> {
        Signal::new(
            "UBER",
            "sec_form_4",
            SignalCategory::Regulatory,
            Utc::now(),
            json!({"filer": "CEO", "shares": 100000}),
            normalized,
            0.95,
            SignalMetadata::new("SEC EDGAR"),
        )
    }

    #[test]
    fn test_score_derived_from_normalized_value() {
        let signal = sample(0.857).unwrap();
        assert_eq!(signal.score, 86);
        assert!(signal.validate().is_ok());

        let bearish = sample(-0.424).unwrap();
        assert_eq!(bearish.score, -42);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            sample(1.2),
            Err(ValidationError::NormalizedOutOfRange(_))
        ));
        assert!(matches!(sample(f64::NAN), Err(ValidationError::NonFinite(_))));
    }

    #[test]
    fn test_score_mismatch_detected() {
        let mut signal = sample(0.5).unwrap();
        signal.score = 60;
        assert!(matches!(
            signal.validate(),
            Err(ValidationError::ScoreMismatch { expected: 50, .. })
        ));
    }

    #[test]
    fn test_confidence_range() {
        let mut signal = sample(0.1).unwrap();
        signal.confidence = 1.01;
        assert!(matches!(
            signal.validate(),
            Err(ValidationError::ConfidenceOutOfRange(_))
        ));
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a = json!({"a": 1, "b": [1, 2, 3]});
        let mut map = serde_json::Map::new();
        map.insert("b".to_string(), json!([1, 2, 3]));
        map.insert("a".to_string(), json!(1));
        let b = serde_json::Value::Object(map);

        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
        assert_ne!(content_hash(&a), content_hash(&json!({"a": 2})));
    }

    #[test]
    fn test_explicit_hash_is_kept() {
        let mut metadata = SignalMetadata::new("SEC EDGAR");
        metadata.raw_data_hash = "abc123".to_string();
        let signal = Signal::new(
            "UBER",
            "sec_form_4",
            SignalCategory::Regulatory,
            Utc::now(),
            json!({}),
            0.0,
            0.5,
            metadata,
        )
        .unwrap();
        assert_eq!(signal.metadata.raw_data_hash, "abc123");
    }

    #[test]
    fn test_category_round_trip_names() {
        for category in SignalCategory::ALL {
            assert_eq!(SignalCategory::parse(category.as_str()), Some(category));
        }
        let encoded = serde_json::to_string(&SignalCategory::WebDigital).unwrap();
        assert_eq!(encoded, "\"web_digital\"");
    }
}
