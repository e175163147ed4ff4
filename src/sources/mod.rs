pub mod auth;
pub mod barcode;
pub mod config;
pub mod ebay;
pub mod stockx;

use crate::engine::types::{ConditionGrade, SoldListing};
use async_trait::async_trait;
use thiserror::Error;

/// Search terms derived from an identification. Sources build their own wire
/// queries from these.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub brand: Option<String>,
    pub model: String,
    pub size: Option<String>,
    pub condition: Option<ConditionGrade>,
}

impl SearchQuery {
    pub fn keywords(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(brand) = self.brand.as_deref() {
            parts.push(brand);
        }
        parts.push(&self.model);
        if let Some(size) = self.size.as_deref() {
            parts.push(size);
        }
        parts.join(" ")
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timed out")]
    Timeout,
}

/// One external sold-listing source. Implementations are queried in priority
/// order by the market aggregator; any failure is non-fatal to the caller.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when credentials/endpoints are present. Unconfigured sources are
    /// skipped without counting as failures.
    fn is_configured(&self) -> bool;

    async fn search_sold(&self, query: &SearchQuery) -> Result<Vec<SoldListing>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_join_present_parts_only() {
        let query = SearchQuery {
            brand: Some("Nike".into()),
            model: "Air Force 1 Low".into(),
            size: None,
            condition: Some(ConditionGrade::VeryGood),
        };
        assert_eq!(query.keywords(), "Nike Air Force 1 Low");
    }
}
