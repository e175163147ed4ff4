use crate::models::AnalysisResponse;
use redis::AsyncCommands;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::warn;

const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Replays a completed analysis for a repeated `Idempotency-Key`. Redis when
/// `REDIS_URL` is set, otherwise an in-memory map bounded by the same TTL
/// plus an entry cap so replay bodies never accumulate for process lifetime.
pub struct IdempotencyStore {
    redis: Option<redis::Client>,
    memory: Mutex<HashMap<String, MemoryEntry>>,
    ttl: Duration,
    max_entries: usize,
}

struct MemoryEntry {
    response: AnalysisResponse,
    stored_at: Instant,
}

impl IdempotencyStore {
    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL").ok().and_then(|url| {
            match redis::Client::open(url) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(target = "magpie.api", error = %err, "invalid REDIS_URL; using memory store");
                    None
                }
            }
        });
        let ttl_secs = std::env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TTL_SECS);
        let max_entries = std::env::var("IDEMPOTENCY_MAX_ENTRIES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_ENTRIES);
        Self::new(redis, Duration::from_secs(ttl_secs), max_entries)
    }

    fn new(redis: Option<redis::Client>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            redis,
            memory: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub async fn get(&self, key: &str) -> Option<AnalysisResponse> {
        if let Some(client) = &self.redis {
            return redis_get(client, key).await;
        }
        let mut guard = self.memory.lock().await;
        match guard.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.response.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: String, response: &AnalysisResponse) {
        if let Some(client) = &self.redis {
            redis_set(client, &key, response, self.ttl.as_secs()).await;
            return;
        }
        let mut guard = self.memory.lock().await;
        guard.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        if guard.len() >= self.max_entries
            && let Some(oldest) = guard
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone())
        {
            guard.remove(&oldest);
        }
        guard.insert(
            key,
            MemoryEntry {
                response: response.clone(),
                stored_at: Instant::now(),
            },
        );
    }
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<AnalysisResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(target = "magpie.api", error = %err, "redis unavailable for idempotency lookup");
            return None;
        }
    };
    let raw: Option<String> = conn.get(key).await.ok();
    raw.and_then(|value| serde_json::from_str(&value).ok())
}

async fn redis_set(client: &redis::Client, key: &str, value: &AnalysisResponse, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}
