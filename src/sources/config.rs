use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static EBAY_APP_ID: Lazy<String> = Lazy::new(|| env::var("EBAY_APP_ID").unwrap_or_default());

pub static EBAY_CERT_ID: Lazy<String> = Lazy::new(|| env::var("EBAY_CERT_ID").unwrap_or_default());

pub static EBAY_ROOT: Lazy<String> = Lazy::new(|| {
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

pub static EBAY_OAUTH_TOKEN_URL: Lazy<String> =
    Lazy::new(|| format!("{}/identity/v1/oauth2/token", *EBAY_ROOT));

pub static EBAY_MARKETPLACE: Lazy<String> =
    Lazy::new(|| env::var("EBAY_MARKETPLACE").unwrap_or_else(|_| "EBAY_US".to_string()));

pub static STOCKX_API_URL: Lazy<String> = Lazy::new(|| {
    env::var("STOCKX_API_URL").unwrap_or_else(|_| "https://api.stockx.com/v2".to_string())
});

pub static STOCKX_API_KEY: Lazy<String> =
    Lazy::new(|| env::var("STOCKX_API_KEY").unwrap_or_default());

pub static UPC_LOOKUP_URL: Lazy<String> = Lazy::new(|| {
    env::var("UPC_LOOKUP_URL").unwrap_or_else(|_| "https://api.upcitemdb.com/prod/trial".to_string())
});
