use crate::engine::types::{
    CompetitionLevel, ConditionAssessment, ConditionGrade, ConfidenceReport, DataQuality,
    DemandIndicators, Identification, MarketSnapshot, PricingRecommendation, Trend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisRequest {
    /// Photo URLs of the item. Optional: text-only and barcode-only
    /// analyses are supported at reduced confidence.
    #[serde(default)]
    pub images_source: Option<ImagesSource>,
    /// Text the seller read off labels, tags, or boxes.
    #[serde(default)]
    pub text_snippets: Vec<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    /// Free-form condition notes ("light scuff on left toe").
    #[serde(default)]
    pub condition_notes: Option<String>,
    #[serde(default)]
    pub category_hint: Option<String>,
    /// Skips automated grading entirely when the seller already knows.
    #[serde(default)]
    pub condition_override: Option<ConditionGrade>,
    /// Stop after identification and grading; no market fetch, no pricing.
    #[serde(default)]
    pub dry_run: bool,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalysisResponse {
    pub analysis_id: String,
    pub identification: Identification,
    pub condition: ConditionAssessment,
    pub market: Option<MarketSummary>,
    pub pricing: Option<PricingRecommendation>,
    pub confidence: Option<ConfidenceReport>,
    pub stages: Vec<StageReport>,
}

/// Condensed market view for the response body. The full listing set stays
/// server-side in the aggregator cache.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MarketSummary {
    pub sold_count: usize,
    pub average_price: f64,
    pub trend: Trend,
    pub demand: DemandIndicators,
    pub competition: CompetitionLevel,
    pub data_quality: DataQuality,
    pub used_fallback: bool,
    pub captured_at: DateTime<Utc>,
}

impl From<&MarketSnapshot> for MarketSummary {
    fn from(snapshot: &MarketSnapshot) -> Self {
        let data_quality = if snapshot.fallback {
            DataQuality::Insufficient
        } else {
            DataQuality::from_sample_count(snapshot.sold_count)
        };
        Self {
            sold_count: snapshot.sold_count,
            average_price: snapshot.average,
            trend: snapshot.trend.clone(),
            demand: snapshot.demand.clone(),
            competition: snapshot.competition,
            data_quality,
            used_fallback: snapshot.fallback,
            captured_at: snapshot.captured_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImagesSource {
    Single(String),
    Multiple(Vec<String>),
}
