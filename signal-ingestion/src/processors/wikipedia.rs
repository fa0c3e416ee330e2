use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use common::{content_hash, Company, RawData, Signal, SignalCategory, SignalMetadata};

use crate::processor::{DataCost, Difficulty, Processor, ProcessorMetadata, UpdateFrequency};

const API_URL: &str = "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article";
const USER_AGENT: &str = "signal-ingestion/0.1 (alternative-data research)";

/// Company metadata key naming the article explicitly
pub const ARTICLE_METADATA_KEY: &str = "wikipedia_article";

const CONFIDENCE: f64 = 0.70;

/// Wikipedia page views connector
/// Daily article views as a proxy for public interest and brand awareness
pub struct WikipediaPageviewsProcessor {
    metadata: ProcessorMetadata,
    client: Client,
    articles: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PageviewItem {
    /// `YYYYMMDDHH`
    timestamp: String,
    views: u64,
}

#[derive(Debug, Deserialize)]
struct PageviewResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl WikipediaPageviewsProcessor {
    pub fn new() -> Self {
        let articles = [
            ("UBER", "Uber"),
            ("LYFT", "Lyft"),
            ("ABNB", "Airbnb"),
            ("GOOGL", "Google"),
            ("AAPL", "Apple_Inc."),
            ("MSFT", "Microsoft"),
            ("TSLA", "Tesla,_Inc."),
            ("AMZN", "Amazon_(company)"),
        ]
        .into_iter()
        .map(|(id, article)| (id.to_string(), article.to_string()))
        .collect();

        Self {
            metadata: ProcessorMetadata {
                signal_type: "wikipedia_pageviews".to_string(),
                category: SignalCategory::Alternative,
                description: "Wikipedia page views - public interest and brand awareness proxy"
                    .to_string(),
                update_frequency: UpdateFrequency::Daily,
                data_source: "Wikimedia Pageviews API".to_string(),
                cost: DataCost::Free,
                difficulty: Difficulty::Easy,
                tags: vec![
                    "wikipedia".to_string(),
                    "pageviews".to_string(),
                    "brand_awareness".to_string(),
                    "public_interest".to_string(),
                ],
            },
            client: Client::new(),
            articles,
        }
    }

    /// Article title for the company: explicit metadata wins over the
    /// built-in mapping
    pub fn article_for(&self, company: &Company) -> Option<String> {
        company
            .metadata_str(ARTICLE_METADATA_KEY)
            .map(str::to_string)
            .or_else(|| self.articles.get(&company.id).cloned())
    }

    fn pageviews_url(article: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}/en.wikipedia/all-access/all-agents/{}/daily/{}/{}",
            API_URL,
            article,
            start.format("%Y%m%d00"),
            end.format("%Y%m%d00")
        )
    }
}

impl Default for WikipediaPageviewsProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for WikipediaPageviewsProcessor {
    fn metadata(&self) -> &ProcessorMetadata {
        &self.metadata
    }

    fn is_applicable(&self, company: &Company) -> bool {
        self.article_for(company).is_some()
    }

    async fn fetch(
        &self,
        company: &Company,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawData> {
        let article = self
            .article_for(company)
            .ok_or_else(|| anyhow!("no Wikipedia article known for {}", company.id))?;
        let url = Self::pageviews_url(&article, start, end);

        info!(company = %company.id, article = %article, "Fetching Wikipedia pageviews");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .with_context(|| format!("requesting {}", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("Wikimedia API error: {}", response.status()));
        }

        let body: PageviewResponse = response.json().await.context("decoding pageviews")?;

        info!(
            company = %company.id,
            days = body.items.len(),
            "Fetched Wikipedia pageviews"
        );

        Ok(json!({
            "article_title": article,
            "pageviews": body.items,
        }))
    }

    fn process(&self, company: &Company, raw: &RawData) -> Result<Vec<Signal>> {
        let pageviews = raw.get("pageviews").cloned().unwrap_or(RawData::Null);
        let items: Vec<PageviewItem> = match &pageviews {
            RawData::Null => Vec::new(),
            value => serde_json::from_value(value.clone()).context("malformed pageview items")?,
        };
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let article = raw
            .get("article_title")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let stats = PageviewStats::from_items(&items);
        let score = pageview_score(stats.avg_daily_views, stats.trend_change_pct);

        // Event time is the last observed day
        let last_day = items
            .iter()
            .map(|item| parse_day(&item.timestamp))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .max()
            .ok_or_else(|| anyhow!("no pageview days"))?;
        let timestamp = last_day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid day {}", last_day))?
            .and_utc();

        let mut description = format!(
            "Wikipedia: {:.0} avg daily views ({} days)",
            stats.avg_daily_views,
            items.len()
        );
        if stats.trend_change_pct > 10.0 {
            description.push_str(&format!(" | views trending up {:+.0}%", stats.trend_change_pct));
        } else if stats.trend_change_pct < -10.0 {
            description.push_str(&format!(" | views trending down {:.0}%", stats.trend_change_pct));
        }
        if stats.spike_ratio > 5.0 {
            description.push_str(&format!(
                " | peak {} views ({:.1}x spike)",
                stats.max_views, stats.spike_ratio
            ));
        }

        let mut metadata = SignalMetadata::new("Wikipedia Pageviews")
            .with_url(format!("https://en.wikipedia.org/wiki/{}", article))
            .with_notes(format!(
                "{:.0} avg views/day, trend: {:+.0}%",
                stats.avg_daily_views, stats.trend_change_pct
            ));
        metadata.raw_data_hash = content_hash(&pageviews);

        let signal = Signal::new(
            company.id.clone(),
            self.metadata.signal_type.clone(),
            self.metadata.category,
            timestamp,
            json!({
                "avg_daily_views": stats.avg_daily_views,
                "total_views": stats.total_views,
                "max_views": stats.max_views,
                "trend_change_pct": stats.trend_change_pct,
                "spike_ratio": stats.spike_ratio,
            }),
            score as f64 / 100.0,
            CONFIDENCE,
            metadata,
        )?
        .with_description(description)
        .with_tags(["wikipedia", "pageviews", "brand_awareness"]);

        Ok(vec![signal])
    }
}

struct PageviewStats {
    total_views: u64,
    avg_daily_views: f64,
    max_views: u64,
    trend_change_pct: f64,
    spike_ratio: f64,
}

impl PageviewStats {
    fn from_items(items: &[PageviewItem]) -> Self {
        let views: Vec<f64> = items.iter().map(|item| item.views as f64).collect();
        let total_views: u64 = items.iter().map(|item| item.views).sum();
        let avg_daily_views = total_views as f64 / items.len() as f64;
        let max_views = items.iter().map(|item| item.views).max().unwrap_or(0);

        // First half vs second half
        let mid = views.len() / 2;
        let first_half_avg = average(&views[..mid]);
        let second_half_avg = average(&views[mid..]);
        let trend_change_pct = if first_half_avg > 0.0 {
            (second_half_avg - first_half_avg) / first_half_avg * 100.0
        } else {
            0.0
        };

        let spike_ratio = if avg_daily_views > 0.0 {
            max_views as f64 / avg_daily_views
        } else {
            1.0
        };

        Self {
            total_views,
            avg_daily_views,
            max_views,
            trend_change_pct,
            spike_ratio,
        }
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Score in [0, 100] from average daily views and the half-over-half trend
///
/// 10k+ views/day scores 60..80, 5k-10k 40..60, 1k-5k 20..40, below 1k 0..20;
/// the trend adds or removes up to 20 points.
pub fn pageview_score(avg_daily_views: f64, trend_change_pct: f64) -> i32 {
    let base = if avg_daily_views > 10_000.0 {
        (60.0 + (avg_daily_views - 10_000.0) / 1_000.0).min(80.0)
    } else if avg_daily_views > 5_000.0 {
        40.0 + (avg_daily_views - 5_000.0) / 5_000.0 * 20.0
    } else if avg_daily_views > 1_000.0 {
        20.0 + (avg_daily_views - 1_000.0) / 4_000.0 * 20.0
    } else {
        avg_daily_views / 1_000.0 * 20.0
    };
    let trend = (trend_change_pct / 5.0).clamp(-20.0, 20.0);

    ((base + trend).trunc() as i32).clamp(0, 100)
}

fn parse_day(timestamp: &str) -> Result<NaiveDate> {
    let day = timestamp
        .get(..8)
        .ok_or_else(|| anyhow!("short pageview timestamp '{}'", timestamp))?;
    NaiveDate::parse_from_str(day, "%Y%m%d")
        .with_context(|| format!("bad pageview timestamp '{}'", timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture(views: &[u64]) -> RawData {
        let items: Vec<RawData> = views
            .iter()
            .enumerate()
            .map(|(i, v)| {
                json!({
                    "project": "en.wikipedia",
                    "article": "Uber",
                    "granularity": "daily",
                    "timestamp": format!("202501{:02}00", i + 10),
                    "access": "all-access",
                    "agent": "all-agents",
                    "views": v,
                })
            })
            .collect();
        json!({ "article_title": "Uber", "pageviews": items })
    }

    fn uber() -> Company {
        Company::new("UBER", "Uber Technologies Inc")
    }

    #[test]
    fn test_score_tiers() {
        assert_eq!(pageview_score(20_000.0, 0.0), 70);
        assert_eq!(pageview_score(50_000.0, 0.0), 80);
        assert_eq!(pageview_score(7_500.0, 0.0), 50);
        assert_eq!(pageview_score(3_000.0, 0.0), 30);
        assert_eq!(pageview_score(500.0, 0.0), 10);
        // Trend is capped at +-20 and the total at [0, 100]
        assert_eq!(pageview_score(500.0, -500.0), 0);
        assert_eq!(pageview_score(50_000.0, 500.0), 100);
    }

    #[test]
    fn test_process_fixture() {
        let processor = WikipediaPageviewsProcessor::new();
        let raw = fixture(&[4_000, 4_000, 6_000, 6_000]);

        let signals = processor.process(&uber(), &raw).unwrap();
        assert_eq!(signals.len(), 1);

        let signal = &signals[0];
        // avg 5000 -> base 40, trend +50% -> +10
        assert_eq!(signal.score, 50);
        assert_eq!(signal.normalized_value, 0.5);
        assert_eq!(signal.confidence, 0.70);
        assert_eq!(signal.signal_type, "wikipedia_pageviews");
        assert_eq!(
            signal.timestamp,
            Utc.with_ymd_and_hms(2025, 1, 13, 0, 0, 0).unwrap()
        );
        assert_eq!(signal.metadata.raw_data_hash, content_hash(&raw["pageviews"]));
        assert!(processor.validate_signal(&uber(), signal).is_ok());
    }

    #[test]
    fn test_process_is_deterministic() {
        let processor = WikipediaPageviewsProcessor::new();
        let raw = fixture(&[1_200, 900, 30_000, 1_100]);

        let a = processor.process(&uber(), &raw).unwrap();
        let b = processor.process(&uber(), &raw).unwrap();
        assert_eq!(a[0].dedup_key(), b[0].dedup_key());
        assert_eq!(a[0].score, b[0].score);
    }

    #[test]
    fn test_process_empty_and_malformed() {
        let processor = WikipediaPageviewsProcessor::new();
        assert!(processor
            .process(&uber(), &json!({ "pageviews": [] }))
            .unwrap()
            .is_empty());
        assert!(processor
            .process(&uber(), &json!({ "pageviews": [{ "timestamp": "x" }] }))
            .is_err());
    }

    #[test]
    fn test_applicability() {
        let processor = WikipediaPageviewsProcessor::new();
        assert!(processor.is_applicable(&uber()));

        let mut unknown = Company::new("ZZZZ", "Obscure Co");
        assert!(!processor.is_applicable(&unknown));

        unknown
            .metadata
            .insert(ARTICLE_METADATA_KEY.to_string(), json!("Obscure_Co"));
        assert_eq!(processor.article_for(&unknown).as_deref(), Some("Obscure_Co"));
    }

    #[test]
    fn test_pageviews_url() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            WikipediaPageviewsProcessor::pageviews_url("Uber", start, end),
            "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article/en.wikipedia/all-access/all-agents/Uber/daily/2025010100/2025013100"
        );
    }
}
