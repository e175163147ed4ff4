use crate::engine::types::{CompetitionLevel, DemandIndicators, ListingFormat, SearchVolume, SoldListing};

/// Assumed watcher count when sources report none.
const DEFAULT_WATCHERS: f64 = 5.0;

/// Typical days-to-sell by format. Deliberately a fixed heuristic rather than
/// a derivation from listing timestamps; see DESIGN.md.
const AUCTION_SALE_DAYS: f64 = 7.0;
const FIXED_PRICE_SALE_DAYS: f64 = 21.0;

/// Coarse, threshold-based demand and competition classifications. These are
/// buckets on purpose: downstream pricing stays deterministic and testable.
pub fn estimate(listings: &[SoldListing]) -> DemandIndicators {
    let watcher_counts: Vec<f64> = listings
        .iter()
        .filter_map(|listing| listing.watchers.map(f64::from))
        .collect();
    let avg_watchers = if watcher_counts.is_empty() {
        DEFAULT_WATCHERS
    } else {
        watcher_counts.iter().sum::<f64>() / watcher_counts.len() as f64
    };

    let est_sale_days = if listings.is_empty() {
        FIXED_PRICE_SALE_DAYS
    } else {
        listings
            .iter()
            .map(|listing| match listing.format {
                ListingFormat::Auction => AUCTION_SALE_DAYS,
                ListingFormat::FixedPrice => FIXED_PRICE_SALE_DAYS,
            })
            .sum::<f64>()
            / listings.len() as f64
    };

    DemandIndicators {
        avg_watchers,
        est_sale_days,
        search_volume: search_volume(listings.len()),
        competition: competition_level(listings.len()),
    }
}

fn search_volume(count: usize) -> SearchVolume {
    match count {
        n if n >= 50 => SearchVolume::High,
        n if n >= 10 => SearchVolume::Medium,
        _ => SearchVolume::Low,
    }
}

pub fn competition_level(count: usize) -> CompetitionLevel {
    match count {
        0..=5 => CompetitionLevel::Low,
        6..=20 => CompetitionLevel::Moderate,
        21..=50 => CompetitionLevel::High,
        _ => CompetitionLevel::Saturated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn listing(watchers: Option<u32>, format: ListingFormat) -> SoldListing {
        SoldListing {
            title: "x".into(),
            price: 50.0,
            condition_label: "Good".into(),
            sold_date: Utc::now(),
            shipping: None,
            watchers,
            format,
        }
    }

    #[test]
    fn watcher_average_uses_default_when_absent() {
        let out = estimate(&[listing(None, ListingFormat::FixedPrice)]);
        assert_eq!(out.avg_watchers, 5.0);
    }

    #[test]
    fn watcher_average_ignores_missing_values() {
        let out = estimate(&[
            listing(Some(10), ListingFormat::FixedPrice),
            listing(None, ListingFormat::FixedPrice),
            listing(Some(20), ListingFormat::FixedPrice),
        ]);
        assert_eq!(out.avg_watchers, 15.0);
    }

    #[test]
    fn sale_duration_averages_the_format_mix() {
        let out = estimate(&[
            listing(None, ListingFormat::Auction),
            listing(None, ListingFormat::FixedPrice),
        ]);
        assert_eq!(out.est_sale_days, 14.0);
    }

    #[test]
    fn competition_bucket_boundaries() {
        assert_eq!(competition_level(0), CompetitionLevel::Low);
        assert_eq!(competition_level(5), CompetitionLevel::Low);
        assert_eq!(competition_level(6), CompetitionLevel::Moderate);
        assert_eq!(competition_level(20), CompetitionLevel::Moderate);
        assert_eq!(competition_level(21), CompetitionLevel::High);
        assert_eq!(competition_level(50), CompetitionLevel::High);
        assert_eq!(competition_level(51), CompetitionLevel::Saturated);
    }

    #[test]
    fn search_volume_boundaries() {
        let many: Vec<SoldListing> = (0..50)
            .map(|_| listing(None, ListingFormat::FixedPrice))
            .collect();
        assert_eq!(estimate(&many).search_volume, SearchVolume::High);
        assert_eq!(estimate(&many[..49]).search_volume, SearchVolume::Medium);
        assert_eq!(estimate(&many[..9]).search_volume, SearchVolume::Low);
    }
}
