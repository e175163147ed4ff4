use crate::engine::types::{ListingFormat, SoldListing};
use crate::http::build_client;
use crate::sources::config::{STOCKX_API_KEY, STOCKX_API_URL};
use crate::sources::{ListingSource, SearchQuery, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Secondary sold-listing source: StockX public market-data sales. Sneaker
/// and streetwear coverage mostly; returns nothing useful outside it, and
/// the aggregator treats an empty batch like any other.
pub struct StockxSource;

#[async_trait]
impl ListingSource for StockxSource {
    fn name(&self) -> &'static str {
        "stockx"
    }

    fn is_configured(&self) -> bool {
        !STOCKX_API_KEY.is_empty()
    }

    async fn search_sold(&self, query: &SearchQuery) -> Result<Vec<SoldListing>, SourceError> {
        let url = format!(
            "{}/catalog/search?query={}&pageSize=50",
            *STOCKX_API_URL,
            urlencoding::encode(&query.keywords()),
        );

        let client = build_client();
        let response = client
            .get(url)
            .header("x-api-key", STOCKX_API_KEY.as_str())
            .send()
            .await
            .map_err(|err| SourceError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: CatalogSearchResponse = response
            .json()
            .await
            .map_err(|err| SourceError::InvalidResponse(err.to_string()))?;

        let size_filter = query.size.clone();
        Ok(payload
            .products
            .unwrap_or_default()
            .into_iter()
            .flat_map(|product| {
                let title = product.title.clone().unwrap_or_default();
                product
                    .sales
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |sale| (title.clone(), sale))
            })
            .filter(|(_, sale)| match (&size_filter, &sale.size) {
                (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
                _ => true,
            })
            .filter_map(|(title, sale)| map_sale(title, sale))
            .collect())
    }
}

fn map_sale(title: String, sale: ProductSale) -> Option<SoldListing> {
    let price = sale.amount?;
    if price <= 0.0 || title.is_empty() {
        return None;
    }
    let sold_date = sale
        .created_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))?;
    Some(SoldListing {
        title,
        price,
        // StockX only trades deadstock; the label maps onto the new grades.
        condition_label: "deadstock".to_string(),
        sold_date,
        shipping: None,
        watchers: None,
        format: ListingFormat::FixedPrice,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogSearchResponse {
    products: Option<Vec<CatalogProduct>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogProduct {
    title: Option<String>,
    sales: Option<Vec<ProductSale>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductSale {
    amount: Option<f64>,
    size: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
}
