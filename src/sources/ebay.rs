#![allow(non_snake_case)]

use crate::engine::types::{ConditionGrade, ListingFormat, SoldListing};
use crate::http::build_client;
use crate::sources::config::{EBAY_MARKETPLACE, EBAY_ROOT};
use crate::sources::{ListingSource, SearchQuery, SourceError, auth};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const MARKETPLACE_INSIGHTS_SCOPES: &[&str] =
    &["https://api.ebay.com/oauth/api_scope/buy.marketplace.insights"];

const PAGE_LIMIT: u32 = 100;

/// Primary sold-listing source: eBay Marketplace Insights item_sales search.
pub struct EbaySource;

#[async_trait]
impl ListingSource for EbaySource {
    fn name(&self) -> &'static str {
        "ebay"
    }

    fn is_configured(&self) -> bool {
        auth::credentials_present()
    }

    async fn search_sold(&self, query: &SearchQuery) -> Result<Vec<SoldListing>, SourceError> {
        let token = auth::get_app_access_token(MARKETPLACE_INSIGHTS_SCOPES)
            .await
            .map_err(|err| SourceError::Request(err.to_string()))?;

        let mut url = format!(
            "{}/buy/marketplace_insights/v1_beta/item_sales/search?q={}&limit={}",
            *EBAY_ROOT,
            urlencoding::encode(&query.keywords()),
            PAGE_LIMIT,
        );
        if let Some(grade) = query.condition
            && let Some(condition_ids) = ebay_condition_ids(grade)
        {
            url.push_str(&format!(
                "&filter={}",
                urlencoding::encode(&format!("conditionIds:{{{condition_ids}}}"))
            ));
        }

        let client = build_client();
        let response = client
            .get(url)
            .bearer_auth(token)
            .header("X-EBAY-C-MARKETPLACE-ID", EBAY_MARKETPLACE.as_str())
            .send()
            .await
            .map_err(|err| SourceError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: ItemSalesResponse = response
            .json()
            .await
            .map_err(|err| SourceError::InvalidResponse(err.to_string()))?;

        Ok(payload
            .itemSales
            .unwrap_or_default()
            .into_iter()
            .filter_map(map_sale)
            .collect())
    }
}

/// eBay condition ids roughly matching our grade ladder; None means no filter
/// (search all conditions) rather than an invented mapping.
fn ebay_condition_ids(grade: ConditionGrade) -> Option<&'static str> {
    match grade {
        ConditionGrade::NewWithTags => Some("1000"),
        ConditionGrade::NewWithoutTags => Some("1500"),
        ConditionGrade::NewOther => Some("1750"),
        ConditionGrade::LikeNew => Some("2750"),
        ConditionGrade::Excellent | ConditionGrade::VeryGood => Some("4000"),
        ConditionGrade::Good => Some("5000"),
        ConditionGrade::Acceptable => Some("6000"),
        ConditionGrade::ForParts => Some("7000"),
    }
}

fn map_sale(sale: ItemSale) -> Option<SoldListing> {
    let price = sale.lastSoldPrice.as_ref()?.value.parse::<f64>().ok()?;
    if price <= 0.0 {
        return None;
    }
    let sold_date = sale
        .lastSoldDate
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))?;
    let format = match sale.bidCount {
        Some(bids) if bids > 0 => ListingFormat::Auction,
        _ => ListingFormat::FixedPrice,
    };
    Some(SoldListing {
        title: sale.title?,
        price,
        condition_label: sale.condition.unwrap_or_else(|| "Used".to_string()),
        sold_date,
        shipping: None,
        watchers: sale.watchCount,
        format,
    })
}

#[derive(Debug, Deserialize)]
struct ItemSalesResponse {
    itemSales: Option<Vec<ItemSale>>,
}

#[derive(Debug, Deserialize)]
struct ItemSale {
    title: Option<String>,
    condition: Option<String>,
    lastSoldPrice: Option<SalePrice>,
    lastSoldDate: Option<String>,
    bidCount: Option<u32>,
    watchCount: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SalePrice {
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_a_complete_sale() {
        let sale = ItemSale {
            title: Some("Nike Air Force 1 Low size 10".into()),
            condition: Some("Pre-owned".into()),
            lastSoldPrice: Some(SalePrice { value: "82.50".into() }),
            lastSoldDate: Some("2026-07-14T00:00:00.000Z".into()),
            bidCount: Some(4),
            watchCount: Some(11),
        };
        let listing = map_sale(sale).expect("mapped");
        assert_eq!(listing.price, 82.5);
        assert_eq!(listing.format, ListingFormat::Auction);
        assert_eq!(listing.watchers, Some(11));
    }

    #[test]
    fn drops_sales_without_a_price_or_date() {
        let sale = ItemSale {
            title: Some("mystery".into()),
            condition: None,
            lastSoldPrice: None,
            lastSoldDate: Some("2026-07-14T00:00:00.000Z".into()),
            bidCount: None,
            watchCount: None,
        };
        assert!(map_sale(sale).is_none());
    }

    #[test]
    fn zero_bid_sales_are_fixed_price() {
        let sale = ItemSale {
            title: Some("BIN".into()),
            condition: Some("Good".into()),
            lastSoldPrice: Some(SalePrice { value: "40".into() }),
            lastSoldDate: Some("2026-07-01T12:30:00.000Z".into()),
            bidCount: Some(0),
            watchCount: None,
        };
        assert_eq!(map_sale(sale).unwrap().format, ListingFormat::FixedPrice);
    }
}
