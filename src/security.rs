use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Token cost of a full pipeline run relative to a single stage call. A run
/// fans out to the vision model and every market source; a stage call does a
/// fraction of that work.
const DEFAULT_ANALYSIS_COST: f64 = 4.0;

#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, KeyRecord>>,
    limiter: Arc<TokenBuckets>,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub org_id: String,
    pub api_key_id: String,
}

#[derive(Clone, Debug, PartialEq)]
struct KeyRecord {
    org_id: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("MAGPIE_API_KEYS").unwrap_or_else(|_| "demo-org:demo-key".to_string());
        let mut keys = parse_key_entries(&raw);
        if keys.is_empty() {
            warn!(
                target = "magpie.api",
                "MAGPIE_API_KEYS produced no keys; falling back to demo credentials"
            );
            keys = parse_key_entries("demo-org:demo-key");
        } else {
            info!(
                target = "magpie.api",
                key_count = keys.len(),
                "loaded API keys from env"
            );
        }
        Self {
            keys: Arc::new(keys),
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.keys.get(presented).map(|record| AuthContext {
            org_id: record.org_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Magpie-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    let cost = route_cost(request.uri().path());
    match state.limiter.consume(&context.org_id, cost).await {
        Ok(()) => {
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(blocked) => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            );
            response.headers_mut().insert(
                http::header::RETRY_AFTER,
                HeaderValue::from_str(&blocked.retry_after_secs().to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("1")),
            );
            Ok(response)
        }
    }
}

/// Full pipeline runs drain more of the bucket than single stage calls.
fn route_cost(path: &str) -> f64 {
    match path {
        "/analyses" | "/jobs/analyses" => analysis_cost(),
        _ => 1.0,
    }
}

fn analysis_cost() -> f64 {
    env::var("ANALYSIS_RATE_COST")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| *value >= 1.0)
        .unwrap_or(DEFAULT_ANALYSIS_COST)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Magpie-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// Parse comma-separated `org:key` pairs. Malformed entries are skipped with
/// a warn; key ids are positional so logs never carry the secret itself.
fn parse_key_entries(raw: &str) -> HashMap<String, KeyRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((org, secret)) = trimmed.split_once(':') else {
            warn!(
                target = "magpie.api",
                "ignored malformed MAGPIE_API_KEYS entry: {trimmed}"
            );
            continue;
        };
        let org = org.trim();
        let secret = secret.trim();
        if org.is_empty() || secret.is_empty() {
            warn!(
                target = "magpie.api",
                "ignored malformed MAGPIE_API_KEYS entry: {trimmed}"
            );
            continue;
        }
        entries.insert(
            secret.to_string(),
            KeyRecord {
                org_id: org.to_string(),
                api_key_id: format!("key-{:02}", idx + 1),
            },
        );
    }
    entries
}

/// Per-org token bucket. Stage calls cost one token; full analyses cost
/// `ANALYSIS_RATE_COST`. Refill is continuous at `rate_per_sec`.
struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Blocked {
    retry_after: f64,
}

impl Blocked {
    fn retry_after_secs(&self) -> u64 {
        self.retry_after.ceil().max(1.0) as u64
    }
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(20.0);
        Self::new(rate_per_sec, capacity)
    }

    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn consume(&self, org_id: &str, cost: f64) -> Result<(), Blocked> {
        // Costs above capacity would never succeed; clamp so a misconfigured
        // ANALYSIS_RATE_COST degrades instead of locking the org out.
        let cost = cost.clamp(1.0, self.capacity);

        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard
            .entry(org_id.to_string())
            .or_insert_with(|| BucketState {
                tokens: self.capacity,
                last_refill: now,
            });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= cost {
            state.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - state.tokens;
            Err(Blocked {
                retry_after: deficit / self.rate_per_sec,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_org_key_pairs_and_skips_malformed_entries() {
        let keys = parse_key_entries("acme:secret-1, nocolon , :empty-org, resale-co:secret-2");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["secret-1"].org_id, "acme");
        assert_eq!(keys["secret-2"].org_id, "resale-co");
        assert_eq!(keys["secret-2"].api_key_id, "key-04");
    }

    #[test]
    fn empty_input_parses_to_no_keys() {
        assert!(parse_key_entries("").is_empty());
        assert!(parse_key_entries(" , ,").is_empty());
    }

    #[test]
    fn analyses_cost_more_than_stage_calls() {
        assert_eq!(route_cost("/analyses"), DEFAULT_ANALYSIS_COST);
        assert_eq!(route_cost("/jobs/analyses"), DEFAULT_ANALYSIS_COST);
        assert_eq!(route_cost("/stages/identify"), 1.0);
        assert_eq!(route_cost("/jobs/some-id"), 1.0);
    }

    #[test]
    fn bearer_and_header_keys_are_both_accepted() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret-1"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("secret-1"));

        let mut headers = http::HeaderMap::new();
        headers.insert("X-Magpie-Key", HeaderValue::from_static("secret-2"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("secret-2"));

        assert!(extract_api_key(&http::HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn bucket_blocks_once_drained_and_reports_retry_after() {
        let buckets = TokenBuckets::new(1.0, 2.0);
        assert!(buckets.consume("acme", 1.0).await.is_ok());
        assert!(buckets.consume("acme", 1.0).await.is_ok());
        let blocked = buckets.consume("acme", 1.0).await.expect_err("drained");
        assert!(blocked.retry_after_secs() >= 1);
    }

    #[tokio::test]
    async fn analysis_cost_drains_the_bucket_faster_than_stage_calls() {
        let buckets = TokenBuckets::new(1.0, DEFAULT_ANALYSIS_COST);
        assert!(buckets.consume("acme", DEFAULT_ANALYSIS_COST).await.is_ok());
        assert!(buckets.consume("acme", DEFAULT_ANALYSIS_COST).await.is_err());
        // A different org has its own bucket.
        assert!(buckets.consume("other", 1.0).await.is_ok());
    }

    #[tokio::test]
    async fn oversized_cost_is_clamped_to_capacity() {
        let buckets = TokenBuckets::new(1.0, 2.0);
        assert!(buckets.consume("acme", 50.0).await.is_ok());
        assert!(buckets.consume("acme", 1.0).await.is_err());
    }
}
