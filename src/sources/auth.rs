use crate::http::build_client;
use crate::sources::config::{EBAY_APP_ID, EBAY_CERT_ID, EBAY_OAUTH_TOKEN_URL};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials in env")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub fn credentials_present() -> bool {
    !EBAY_APP_ID.is_empty() && !EBAY_CERT_ID.is_empty()
}

fn basic_auth_header() -> Result<String, EbayAuthError> {
    if !credentials_present() {
        return Err(EbayAuthError::MissingCredentials);
    }
    let raw = format!("{}:{}", *EBAY_APP_ID, *EBAY_CERT_ID);
    Ok(format!("Basic {}", BASE64.encode(raw)))
}

/// Client-credentials token for the read-only buy/marketplace scopes. The
/// engine never sells, so no user refresh-token flow exists here.
pub async fn get_app_access_token(scopes: &[&str]) -> Result<String, EbayAuthError> {
    let authorization = basic_auth_header()?;
    let body = [
        ("grant_type", "client_credentials"),
        ("scope", &scopes.join(" ")),
    ];
    request_token(&authorization, &body).await
}

async fn request_token(
    authorization: &str,
    params: &[(&str, &str)],
) -> Result<String, EbayAuthError> {
    let client = build_client();
    let response = client
        .post(EBAY_OAUTH_TOKEN_URL.as_str())
        .header(AUTHORIZATION, authorization)
        .form(&params)
        .send()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(EbayAuthError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;
    Ok(payload.access_token)
}
