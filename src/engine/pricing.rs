use crate::engine::types::{
    CompetitionLevel, ConditionGrade, Identification, ItemCategory, MarketSnapshot,
    PricingRecommendation, PricingStrategy,
};

/// A recommendation never drops below this floor, whatever the multipliers do.
const PRICE_FLOOR: f64 = 5.0;

/// Ceiling tier over the recommended price.
const MAX_PROFIT_FACTOR: f64 = 1.15;

/// Brands that reliably command a premium on the secondary market.
const PREMIUM_BRANDS: &[&str] = &[
    "jordan", "nike", "supreme", "gucci", "apple", "lego", "patagonia", "sony",
];

fn competition_multiplier(level: CompetitionLevel) -> f64 {
    match level {
        CompetitionLevel::Low => 1.1,
        CompetitionLevel::Moderate => 1.0,
        CompetitionLevel::High => 0.95,
        CompetitionLevel::Saturated => 0.9,
    }
}

fn category_multiplier(category: ItemCategory) -> f64 {
    match category {
        ItemCategory::Sneakers => 1.05,
        ItemCategory::Collectibles => 1.1,
        ItemCategory::Electronics => 0.95,
        ItemCategory::Clothing => 0.95,
        _ => 1.0,
    }
}

fn brand_multiplier(brand: Option<&str>) -> f64 {
    let Some(brand) = brand else { return 1.0 };
    let lowered = brand.to_lowercase();
    if PREMIUM_BRANDS.iter().any(|premium| lowered.contains(premium)) {
        1.05
    } else {
        1.0
    }
}

/// Quick-sale discount factor, env-tunable but clamped to the sane band.
fn quick_sale_factor() -> f64 {
    std::env::var("QUICK_SALE_FACTOR")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(0.88)
        .clamp(0.85, 0.90)
}

/// Combine the observed average with the condition, competition, category and
/// brand multipliers into the three-tier ladder. Always monotonic:
/// quick_sale < recommended < max_profit.
pub fn recommend(
    snapshot: &MarketSnapshot,
    grade: ConditionGrade,
    identification: &Identification,
) -> PricingRecommendation {
    let condition_mult = grade.multiplier();
    let competition_mult = competition_multiplier(snapshot.competition);
    let category_mult = category_multiplier(identification.category);
    let brand_mult = brand_multiplier(identification.brand.as_deref());

    let adjusted = snapshot.average * condition_mult * competition_mult * category_mult * brand_mult;
    let recommended = round_cents(adjusted.max(PRICE_FLOOR));
    let quick_sale = round_cents(recommended * quick_sale_factor());
    let max_profit = round_cents(recommended * MAX_PROFIT_FACTOR);

    let strategy = match grade {
        ConditionGrade::NewWithTags | ConditionGrade::LikeNew => PricingStrategy::Premium,
        _ => PricingStrategy::Competitive,
    };

    PricingRecommendation {
        recommended,
        quick_sale,
        max_profit,
        strategy,
        justification: justify(snapshot, grade, identification, recommended),
    }
}

/// User-facing transparency only: these restate the inputs, they carry no
/// additional pricing logic.
fn justify(
    snapshot: &MarketSnapshot,
    grade: ConditionGrade,
    identification: &Identification,
    recommended: f64,
) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Based on {} sold listings averaging ${:.2} over the last 60 days",
            snapshot.sold_count, snapshot.average
        ),
        format!(
            "Condition \"{}\" ({}) applies a {:.0}% price factor",
            grade.key().replace('_', " "),
            grade.describe(),
            grade.multiplier() * 100.0
        ),
        format!("Competition is {:?}", snapshot.competition).to_lowercase(),
    ];
    if brand_multiplier(identification.brand.as_deref()) > 1.0
        && let Some(brand) = identification.brand.as_deref()
    {
        lines.push(format!("{brand} items carry a resale premium"));
    }
    if snapshot.fallback {
        lines.push("Very little sold data was found; price is a conservative estimate".to_string());
    }
    lines.push(format!("Recommended listing price: ${recommended:.2}"));
    lines
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{
        DemandIndicators, SearchVolume, Trend, TrendDirection, TrendStrength,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot(average: f64, sold_count: usize, competition: CompetitionLevel) -> MarketSnapshot {
        MarketSnapshot {
            listings: Vec::new(),
            sold_count,
            average,
            price_by_grade: BTreeMap::new(),
            trend: Trend {
                direction: TrendDirection::Stable,
                strength: TrendStrength::Weak,
                change_pct: 0.0,
                timeframe: "30 days".into(),
                seasonal_note: None,
            },
            demand: DemandIndicators {
                avg_watchers: 5.0,
                est_sale_days: 14.0,
                search_volume: SearchVolume::Medium,
                competition,
            },
            competition,
            fallback: false,
            captured_at: Utc::now(),
        }
    }

    fn nike() -> Identification {
        let mut id = Identification::unknown();
        id.name = "Air Force 1 Low".into();
        id.brand = Some("Nike".into());
        id.category = ItemCategory::Sneakers;
        id
    }

    #[test]
    fn ladder_is_strictly_monotonic() {
        let out = recommend(
            &snapshot(120.0, 30, CompetitionLevel::Moderate),
            ConditionGrade::VeryGood,
            &nike(),
        );
        assert!(out.quick_sale < out.recommended);
        assert!(out.recommended < out.max_profit);
    }

    #[test]
    fn ladder_is_monotonic_even_at_the_floor() {
        let out = recommend(
            &snapshot(1.0, 1, CompetitionLevel::Saturated),
            ConditionGrade::ForParts,
            &Identification::unknown(),
        );
        assert_eq!(out.recommended, PRICE_FLOOR);
        assert!(out.quick_sale < out.recommended);
        assert!(out.recommended < out.max_profit);
    }

    #[test]
    fn multipliers_compound() {
        let out = recommend(
            &snapshot(100.0, 30, CompetitionLevel::Low),
            ConditionGrade::NewWithTags,
            &nike(),
        );
        // 100 * 1.0 * 1.1 * 1.05 * 1.05
        assert_eq!(out.recommended, 121.28);
    }

    #[test]
    fn premium_strategy_only_for_top_grades() {
        let snap = snapshot(100.0, 30, CompetitionLevel::Moderate);
        let id = nike();
        let nwt = recommend(&snap, ConditionGrade::NewWithTags, &id);
        let like_new = recommend(&snap, ConditionGrade::LikeNew, &id);
        let good = recommend(&snap, ConditionGrade::Good, &id);
        assert_eq!(nwt.strategy, PricingStrategy::Premium);
        assert_eq!(like_new.strategy, PricingStrategy::Premium);
        assert_eq!(good.strategy, PricingStrategy::Competitive);
    }

    #[test]
    fn justification_restates_sample_and_condition() {
        let out = recommend(
            &snapshot(80.0, 52, CompetitionLevel::Saturated),
            ConditionGrade::VeryGood,
            &nike(),
        );
        assert!(out.justification[0].contains("52 sold listings"));
        assert!(out.justification[1].contains("very good"));
        assert!(out.justification.iter().any(|line| line.contains("saturated")));
        assert!(out.justification.iter().any(|line| line.contains("premium")));
    }

    #[test]
    fn fallback_snapshot_adds_a_low_data_caveat() {
        let mut snap = snapshot(25.0, 1, CompetitionLevel::Low);
        snap.fallback = true;
        let out = recommend(&snap, ConditionGrade::Good, &Identification::unknown());
        assert!(out.justification.iter().any(|line| line.contains("conservative")));
    }
}
