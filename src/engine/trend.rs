use crate::engine::types::{SoldListing, Trend, TrendDirection, TrendStrength};
use chrono::Datelike;

/// Below this many listings an earlier/later split is meaningless.
const MIN_LISTINGS_FOR_SPLIT: usize = 5;

/// Derive a trend classification from time-ordered sold listings. Listings
/// are sorted by sold date ascending before the earlier/later split; the
/// percentage change between half averages maps onto fixed thresholds,
/// boundary-inclusive on the moving side.
pub fn analyze(listings: &[SoldListing]) -> Trend {
    if listings.len() < MIN_LISTINGS_FOR_SPLIT {
        return Trend {
            direction: TrendDirection::Stable,
            strength: TrendStrength::Weak,
            change_pct: 0.0,
            timeframe: "insufficient data".to_string(),
            seasonal_note: seasonal_note(listings),
        };
    }

    let mut ordered: Vec<&SoldListing> = listings.iter().collect();
    ordered.sort_by_key(|listing| listing.sold_date);

    let mid = ordered.len() / 2;
    let earlier_avg = average(&ordered[..mid]);
    let later_avg = average(&ordered[mid..]);
    let change_pct = if earlier_avg > 0.0 {
        (later_avg - earlier_avg) / earlier_avg * 100.0
    } else {
        0.0
    };

    let (direction, strength) = classify_change(change_pct);
    let span_days = (ordered[ordered.len() - 1].sold_date - ordered[0].sold_date).num_days();

    Trend {
        direction,
        strength,
        change_pct,
        timeframe: format!("{span_days} days"),
        seasonal_note: seasonal_note(listings),
    }
}

fn classify_change(change_pct: f64) -> (TrendDirection, TrendStrength) {
    if change_pct >= 10.0 {
        (TrendDirection::Increasing, TrendStrength::Strong)
    } else if change_pct >= 3.0 {
        (TrendDirection::Increasing, TrendStrength::Moderate)
    } else if change_pct > -3.0 {
        (TrendDirection::Stable, TrendStrength::Weak)
    } else if change_pct > -10.0 {
        (TrendDirection::Decreasing, TrendStrength::Moderate)
    } else {
        (TrendDirection::Decreasing, TrendStrength::Strong)
    }
}

fn average(listings: &[&SoldListing]) -> f64 {
    if listings.is_empty() {
        return 0.0;
    }
    listings.iter().map(|listing| listing.price).sum::<f64>() / listings.len() as f64
}

/// Side annotation only; never changes the direction/strength classification.
fn seasonal_note(listings: &[SoldListing]) -> Option<String> {
    let holiday_sales = listings
        .iter()
        .filter(|listing| matches!(listing.sold_date.month(), 11 | 12))
        .count();
    if holiday_sales * 2 > listings.len() && !listings.is_empty() {
        Some("majority of sales fell in the holiday season".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ListingFormat;
    use chrono::{Duration, TimeZone, Utc};

    fn listing(price: f64, days_ago: i64) -> SoldListing {
        SoldListing {
            title: format!("item at {price}"),
            price,
            condition_label: "Good".into(),
            sold_date: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap() - Duration::days(days_ago),
            shipping: None,
            watchers: None,
            format: ListingFormat::FixedPrice,
        }
    }

    /// Six listings whose later-half average is `ratio` times the earlier-half
    /// average of 100.
    fn split_set(ratio: f64) -> Vec<SoldListing> {
        vec![
            listing(100.0, 30),
            listing(100.0, 25),
            listing(100.0, 20),
            listing(100.0 * ratio, 10),
            listing(100.0 * ratio, 5),
            listing(100.0 * ratio, 1),
        ]
    }

    #[test]
    fn too_few_listings_is_stable_weak() {
        let out = analyze(&split_set(2.0)[..4]);
        assert_eq!(out.direction, TrendDirection::Stable);
        assert_eq!(out.strength, TrendStrength::Weak);
        assert_eq!(out.timeframe, "insufficient data");
    }

    #[test]
    fn exact_plus_ten_percent_is_strong_increase() {
        let out = analyze(&split_set(1.10));
        assert_eq!(out.direction, TrendDirection::Increasing);
        assert_eq!(out.strength, TrendStrength::Strong);
    }

    #[test]
    fn exact_plus_three_percent_is_moderate_increase() {
        let out = analyze(&split_set(1.03));
        assert_eq!(out.direction, TrendDirection::Increasing);
        assert_eq!(out.strength, TrendStrength::Moderate);
    }

    #[test]
    fn exact_minus_three_percent_is_moderate_decrease() {
        let out = analyze(&split_set(0.97));
        assert_eq!(out.direction, TrendDirection::Decreasing);
        assert_eq!(out.strength, TrendStrength::Moderate);
    }

    #[test]
    fn exact_minus_ten_percent_is_strong_decrease() {
        let out = analyze(&split_set(0.90));
        assert_eq!(out.direction, TrendDirection::Decreasing);
        assert_eq!(out.strength, TrendStrength::Strong);
    }

    #[test]
    fn small_wiggle_is_stable() {
        let out = analyze(&split_set(1.01));
        assert_eq!(out.direction, TrendDirection::Stable);
        assert_eq!(out.strength, TrendStrength::Weak);
    }

    #[test]
    fn unsorted_input_is_sorted_before_the_split() {
        let mut set = split_set(1.2);
        set.reverse();
        let out = analyze(&set);
        assert_eq!(out.direction, TrendDirection::Increasing);
        assert_eq!(out.strength, TrendStrength::Strong);
    }

    #[test]
    fn seasonal_note_never_changes_classification() {
        let mut set = split_set(1.01);
        for item in &mut set {
            item.sold_date = Utc.with_ymd_and_hms(2025, 12, 10, 0, 0, 0).unwrap();
        }
        let out = analyze(&set);
        assert_eq!(out.direction, TrendDirection::Stable);
        assert!(out.seasonal_note.is_some());
    }
}
