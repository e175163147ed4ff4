use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical structured guess of what was photographed. Built once per
/// analysis by the identification aggregator, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identification {
    pub name: String,
    pub brand: Option<String>,
    pub product_line: Option<String>,
    pub variant: Option<String>,
    pub style_code: Option<String>,
    pub colorway: Option<String>,
    pub size: Option<String>,
    pub category: ItemCategory,
    pub method: IdentificationMethod,
    pub confidence: f64,
}

impl Identification {
    /// Shared low-confidence sentinel used by every stage that has nothing
    /// better to offer.
    pub fn unknown() -> Self {
        Self {
            name: "Unknown item".to_string(),
            brand: None,
            product_line: None,
            variant: None,
            style_code: None,
            colorway: None,
            size: None,
            category: ItemCategory::Other,
            method: IdentificationMethod::CategoryBased,
            confidence: 0.0,
        }
    }

    /// Normalized brand+model+size key used for market lookups and caching.
    pub fn search_key(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(brand) = self.brand.as_deref() {
            parts.push(brand);
        }
        parts.push(&self.name);
        if let Some(size) = self.size.as_deref() {
            parts.push(size);
        }
        normalize_key(&parts.join(" "))
    }
}

/// Lowercase, alphanumeric tokens joined by `-`. Collapses whitespace and
/// punctuation so "Air Force 1  Low" and "air-force-1-low" key identically.
pub fn normalize_key(raw: &str) -> String {
    raw.to_lowercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Sneakers,
    Clothing,
    Electronics,
    Accessories,
    Home,
    Collectibles,
    Books,
    Toys,
    Sports,
    #[default]
    Other,
}

impl ItemCategory {
    /// Best-effort mapping from free-text category hints coming off the
    /// vision provider or the request.
    pub fn from_hint(hint: &str) -> Self {
        let lowered = hint.trim().to_lowercase();
        match lowered.as_str() {
            text if text.contains("sneaker") || text.contains("shoe") || text.contains("footwear") => {
                Self::Sneakers
            }
            text if text.contains("cloth") || text.contains("apparel") || text.contains("shirt") => {
                Self::Clothing
            }
            text if text.contains("electronic") || text.contains("gadget") => Self::Electronics,
            text if text.contains("accessor") || text.contains("bag") || text.contains("watch") => {
                Self::Accessories
            }
            text if text.contains("home") || text.contains("kitchen") => Self::Home,
            text if text.contains("collect") || text.contains("vintage") => Self::Collectibles,
            text if text.contains("book") => Self::Books,
            text if text.contains("toy") || text.contains("game") => Self::Toys,
            text if text.contains("sport") || text.contains("outdoor") => Self::Sports,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationMethod {
    VisualText,
    VisualOnly,
    TextOnly,
    CategoryBased,
}

/// The nine standardized used-goods condition levels, ordered best to worst.
/// Each carries the fixed price multiplier applied by the pricing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionGrade {
    NewWithTags,
    NewWithoutTags,
    NewOther,
    LikeNew,
    Excellent,
    VeryGood,
    Good,
    Acceptable,
    ForParts,
}

impl ConditionGrade {
    pub fn multiplier(&self) -> f64 {
        match self {
            ConditionGrade::NewWithTags => 1.0,
            ConditionGrade::NewWithoutTags => 0.95,
            ConditionGrade::NewOther => 0.9,
            ConditionGrade::LikeNew => 0.85,
            ConditionGrade::Excellent => 0.75,
            ConditionGrade::VeryGood => 0.65,
            ConditionGrade::Good => 0.55,
            ConditionGrade::Acceptable => 0.45,
            ConditionGrade::ForParts => 0.2,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ConditionGrade::NewWithTags => "new_with_tags",
            ConditionGrade::NewWithoutTags => "new_without_tags",
            ConditionGrade::NewOther => "new_other",
            ConditionGrade::LikeNew => "like_new",
            ConditionGrade::Excellent => "excellent",
            ConditionGrade::VeryGood => "very_good",
            ConditionGrade::Good => "good",
            ConditionGrade::Acceptable => "acceptable",
            ConditionGrade::ForParts => "for_parts",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ConditionGrade::NewWithTags => "Brand new with original tags attached",
            ConditionGrade::NewWithoutTags => "Brand new, tags removed",
            ConditionGrade::NewOther => "New with defects or missing packaging",
            ConditionGrade::LikeNew => "Worn once or twice, indistinguishable from new",
            ConditionGrade::Excellent => "Light use, no visible flaws at arm's length",
            ConditionGrade::VeryGood => "Gentle wear, minor cosmetic flaws",
            ConditionGrade::Good => "Normal wear consistent with regular use",
            ConditionGrade::Acceptable => "Heavy wear, fully functional",
            ConditionGrade::ForParts => "Not working or damaged, sold for parts",
        }
    }
}

impl Default for ConditionGrade {
    /// Middle-of-the-road default when no narrative matched.
    fn default() -> Self {
        ConditionGrade::Good
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
    Critical,
}

impl Severity {
    pub fn display_weight(&self) -> u8 {
        match self {
            Severity::Minor => 1,
            Severity::Moderate => 2,
            Severity::Major => 3,
            Severity::Critical => 4,
        }
    }
}

/// One observed flaw from the condition narrative. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionFactor {
    pub area: String,
    pub issue: String,
    pub severity: Severity,
    pub value_impact_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionAssessment {
    pub grade: ConditionGrade,
    pub confidence: f64,
    pub factors: Vec<ConditionFactor>,
}

impl ConditionAssessment {
    /// Sentinel used when the condition provider fails outright.
    pub fn unknown() -> Self {
        Self {
            grade: ConditionGrade::default(),
            confidence: 0.0,
            factors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingFormat {
    Auction,
    FixedPrice,
}

/// One historical sold item as retrieved from a source. Value type: listings
/// are filtered and merged into new collections, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoldListing {
    pub title: String,
    pub price: f64,
    pub condition_label: String,
    pub sold_date: DateTime<Utc>,
    pub shipping: Option<f64>,
    pub watchers: Option<u32>,
    pub format: ListingFormat,
}

impl SoldListing {
    /// Dedup identity: sources share no listing ids, so title+price+date is
    /// the only cross-source triple we can trust.
    pub fn dedup_key(&self) -> (String, i64, i64) {
        (
            self.title.trim().to_lowercase(),
            (self.price * 100.0).round() as i64,
            self.sold_date.timestamp(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBucket {
    pub count: usize,
    pub average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrength {
    Strong,
    Moderate,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub strength: TrendStrength,
    pub change_pct: f64,
    pub timeframe: String,
    pub seasonal_note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchVolume {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionLevel {
    Low,
    Moderate,
    High,
    Saturated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandIndicators {
    pub avg_watchers: f64,
    pub est_sale_days: f64,
    pub search_volume: SearchVolume,
    pub competition: CompetitionLevel,
}

/// Aggregated, cached view of recent sold listings for one
/// identification+condition pair. Rebuilt atomically from its source
/// listings; `sold_count` always equals `listings.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub listings: Vec<SoldListing>,
    pub sold_count: usize,
    pub average: f64,
    pub price_by_grade: BTreeMap<String, PriceBucket>,
    pub trend: Trend,
    pub demand: DemandIndicators,
    pub competition: CompetitionLevel,
    /// True when no real listings survived filtering and the single
    /// conservative fallback listing was synthesized instead.
    pub fallback: bool,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingStrategy {
    Premium,
    Competitive,
}

/// Derived on every pricing request, never cached or persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRecommendation {
    pub recommended: f64,
    pub quick_sale: f64,
    pub max_profit: f64,
    pub strategy: PricingStrategy,
    pub justification: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Excellent,
    Good,
    Fair,
    Limited,
    Insufficient,
}

impl DataQuality {
    pub fn from_sample_count(count: usize) -> Self {
        match count {
            0 => DataQuality::Insufficient,
            1..=4 => DataQuality::Limited,
            5..=19 => DataQuality::Fair,
            20..=49 => DataQuality::Good,
            _ => DataQuality::Excellent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub overall: f64,
    pub identification: f64,
    pub condition: f64,
    pub data: f64,
    pub quality: DataQuality,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn search_key_normalizes_brand_model_size() {
        let mut id = Identification::unknown();
        id.name = "Air Force 1 Low".into();
        id.brand = Some("Nike".into());
        id.size = Some("10".into());
        assert_eq!(id.search_key(), "nike-air-force-1-low-10");
    }

    #[test]
    fn normalize_key_collapses_punctuation() {
        assert_eq!(normalize_key("  Jordan 1 -- 'Bred'  "), "jordan-1-bred");
    }

    #[test]
    fn condition_multipliers_are_monotonic() {
        let grades = [
            ConditionGrade::NewWithTags,
            ConditionGrade::NewWithoutTags,
            ConditionGrade::NewOther,
            ConditionGrade::LikeNew,
            ConditionGrade::Excellent,
            ConditionGrade::VeryGood,
            ConditionGrade::Good,
            ConditionGrade::Acceptable,
            ConditionGrade::ForParts,
        ];
        let multipliers: Vec<f64> = grades.iter().map(|g| g.multiplier()).collect();
        for pair in multipliers.windows(2) {
            assert!(pair[0] > pair[1], "grades must strictly decrease in value");
        }
    }

    #[test]
    fn dedup_key_ignores_case_and_subcent_noise() {
        let date = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let a = SoldListing {
            title: "Nike Air Force 1".into(),
            price: 80.0,
            condition_label: "Very Good".into(),
            sold_date: date,
            shipping: None,
            watchers: None,
            format: ListingFormat::FixedPrice,
        };
        let b = SoldListing {
            title: "nike air force 1".into(),
            price: 80.001,
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn data_quality_thresholds() {
        assert_eq!(DataQuality::from_sample_count(0), DataQuality::Insufficient);
        assert_eq!(DataQuality::from_sample_count(1), DataQuality::Limited);
        assert_eq!(DataQuality::from_sample_count(4), DataQuality::Limited);
        assert_eq!(DataQuality::from_sample_count(5), DataQuality::Fair);
        assert_eq!(DataQuality::from_sample_count(19), DataQuality::Fair);
        assert_eq!(DataQuality::from_sample_count(20), DataQuality::Good);
        assert_eq!(DataQuality::from_sample_count(49), DataQuality::Good);
        assert_eq!(DataQuality::from_sample_count(50), DataQuality::Excellent);
    }

    #[test]
    fn category_hints_map_to_enum() {
        assert_eq!(ItemCategory::from_hint("Sneakers & Shoes"), ItemCategory::Sneakers);
        assert_eq!(ItemCategory::from_hint("consumer electronics"), ItemCategory::Electronics);
        assert_eq!(ItemCategory::from_hint("mystery box"), ItemCategory::Other);
    }
}
