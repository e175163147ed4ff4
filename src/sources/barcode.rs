use crate::http::build_client;
use crate::sources::config::UPC_LOOKUP_URL;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BarcodeError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Best-effort product record from the barcode database.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    items: Option<Vec<ProductRecord>>,
}

/// Look up a scanned barcode. Returns None on any failure; a missing product
/// record is normal, not an error the pipeline should see.
pub async fn lookup(barcode: &str) -> Option<ProductRecord> {
    match fetch(barcode).await {
        Ok(record) => record,
        Err(err) => {
            warn!(target = "magpie.sources", barcode, error = %err, "barcode lookup failed");
            None
        }
    }
}

async fn fetch(barcode: &str) -> Result<Option<ProductRecord>, BarcodeError> {
    let url = format!(
        "{}/lookup?upc={}",
        *UPC_LOOKUP_URL,
        urlencoding::encode(barcode)
    );
    let client = build_client();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| BarcodeError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(BarcodeError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let mut payload: LookupResponse = response
        .json()
        .await
        .map_err(|err| BarcodeError::Deserialize(err.to_string()))?;
    Ok(payload.items.as_mut().and_then(|items| {
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }))
}
