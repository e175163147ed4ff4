use crate::engine::types::{
    ConditionGrade, Identification, ListingFormat, MarketSnapshot, PriceBucket, SoldListing,
};
use crate::engine::{condition, demand, trend};
use crate::sources::{ListingSource, SearchQuery, SourceError};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Listings older than this are ignored when building a snapshot.
const TRAILING_WINDOW_DAYS: i64 = 60;

/// Cache entries older than this are refreshed on the next lookup.
const CACHE_TTL_HOURS: i64 = 24;

/// Nominal price of the single synthetic listing used when no real sold data
/// survives filtering. Conservative on purpose.
const FALLBACK_LISTING_PRICE: f64 = 25.0;

fn source_timeout() -> std::time::Duration {
    let secs = std::env::var("SOURCE_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10);
    std::time::Duration::from_secs(secs)
}

struct CacheEntry {
    snapshot: MarketSnapshot,
    captured_at: DateTime<Utc>,
}

/// The one stateful component of the engine. Owns the snapshot cache for the
/// process lifetime; created once and shared. Entries are evicted lazily on
/// lookup, never swept.
pub struct MarketDataAggregator {
    sources: Vec<Arc<dyn ListingSource>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    /// Per-key gates so concurrent misses on the same key produce exactly one
    /// external fetch.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ttl: Duration,
}

impl MarketDataAggregator {
    pub fn new(sources: Vec<Arc<dyn ListingSource>>) -> Self {
        Self::with_ttl(sources, Duration::hours(CACHE_TTL_HOURS))
    }

    pub fn with_ttl(sources: Vec<Arc<dyn ListingSource>>, ttl: Duration) -> Self {
        Self {
            sources,
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached, trend-aware view of recent sold listings for this
    /// identification+condition pair. Never fails: source errors degrade to
    /// the synthetic fallback snapshot.
    pub async fn market_snapshot(
        &self,
        identification: &Identification,
        grade: ConditionGrade,
    ) -> MarketSnapshot {
        let key = cache_key(identification, grade);

        if let Some(snapshot) = self.cached(&key).await {
            crate::metrics::cache_event(&key, "hit");
            return snapshot;
        }

        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _fetch_permit = gate.lock().await;

        // A racing caller may have refreshed while we waited on the gate.
        if let Some(snapshot) = self.cached(&key).await {
            crate::metrics::cache_event(&key, "hit");
            return snapshot;
        }

        crate::metrics::cache_event(&key, "miss");
        let snapshot = self.refresh(identification, grade).await;
        {
            let mut cache = self.cache.lock().await;
            cache.insert(
                key.clone(),
                CacheEntry {
                    snapshot: snapshot.clone(),
                    captured_at: Utc::now(),
                },
            );
        }
        self.inflight.lock().await.remove(&key);
        snapshot
    }

    async fn cached(&self, key: &str) -> Option<MarketSnapshot> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if Utc::now() - entry.captured_at < self.ttl => {
                Some(entry.snapshot.clone())
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    /// Query every configured source concurrently, then merge in priority
    /// order. Individual source failures are logged and skipped.
    async fn refresh(
        &self,
        identification: &Identification,
        grade: ConditionGrade,
    ) -> MarketSnapshot {
        let query = SearchQuery {
            brand: identification.brand.clone(),
            model: identification.name.clone(),
            size: identification.size.clone(),
            condition: Some(grade),
        };

        let mut tasks = JoinSet::new();
        for (priority, source) in self.sources.iter().enumerate() {
            if !source.is_configured() {
                warn!(
                    target = "magpie.market",
                    source = source.name(),
                    "source not configured, skipping"
                );
                continue;
            }
            let source = source.clone();
            let query = query.clone();
            tasks.spawn(async move {
                let name = source.name();
                (priority, name, fetch_with_retry(source, query).await)
            });
        }

        let mut batches: Vec<(usize, Vec<SoldListing>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((priority, _, Ok(listings))) => batches.push((priority, listings)),
                Ok((_, name, Err(err))) => {
                    warn!(target = "magpie.market", source = name, error = %err, "source fetch failed");
                }
                Err(err) => {
                    warn!(target = "magpie.market", error = %err, "source task panicked");
                }
            }
        }
        batches.sort_by_key(|(priority, _)| *priority);

        let merged: Vec<SoldListing> = batches
            .into_iter()
            .flat_map(|(_, listings)| listings)
            .collect();

        build_snapshot(merged, &query, grade)
    }
}

fn cache_key(identification: &Identification, grade: ConditionGrade) -> String {
    format!("{}_{}", identification.search_key(), grade.key())
}

async fn fetch_with_retry(
    source: Arc<dyn ListingSource>,
    query: SearchQuery,
) -> Result<Vec<SoldListing>, SourceError> {
    match fetch_once(source.as_ref(), &query).await {
        Err(SourceError::Request(first)) => {
            let backoff_ms = rand::rng().random_range(200..500);
            warn!(
                target = "magpie.market",
                source = source.name(),
                error = %first,
                backoff_ms,
                "retrying source once"
            );
            sleep(std::time::Duration::from_millis(backoff_ms)).await;
            fetch_once(source.as_ref(), &query).await
        }
        other => other,
    }
}

async fn fetch_once(
    source: &dyn ListingSource,
    query: &SearchQuery,
) -> Result<Vec<SoldListing>, SourceError> {
    match timeout(source_timeout(), source.search_sold(query)).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout),
    }
}

/// Deduplicate, window-filter and bucket the merged listings, synthesizing
/// the conservative fallback listing when nothing survives. The snapshot is
/// built whole here and never patched afterwards.
fn build_snapshot(merged: Vec<SoldListing>, query: &SearchQuery, grade: ConditionGrade) -> MarketSnapshot {
    let cutoff = Utc::now() - Duration::days(TRAILING_WINDOW_DAYS);

    let mut seen = HashSet::new();
    let mut listings: Vec<SoldListing> = merged
        .into_iter()
        .filter(|listing| listing.sold_date >= cutoff)
        .filter(|listing| seen.insert(listing.dedup_key()))
        .collect();

    let fallback = listings.is_empty();
    if fallback {
        listings.push(SoldListing {
            title: format!("{} (estimated)", query.keywords()),
            price: FALLBACK_LISTING_PRICE,
            condition_label: grade.key().replace('_', " "),
            sold_date: Utc::now(),
            shipping: None,
            watchers: None,
            format: ListingFormat::FixedPrice,
        });
    }

    let average = listings.iter().map(|listing| listing.price).sum::<f64>() / listings.len() as f64;
    let price_by_grade = bucket_by_grade(&listings);
    let trend = trend::analyze(&listings);
    let demand = demand::estimate(&listings);
    let competition = demand.competition;

    MarketSnapshot {
        sold_count: listings.len(),
        average,
        price_by_grade,
        trend,
        demand,
        competition,
        fallback,
        captured_at: Utc::now(),
        listings,
    }
}

fn bucket_by_grade(listings: &[SoldListing]) -> BTreeMap<String, PriceBucket> {
    let mut sums: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for listing in listings {
        let grade = condition::assess(&listing.condition_label).grade;
        let entry = sums.entry(grade.key().to_string()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += listing.price;
    }
    sums.into_iter()
        .map(|(key, (count, total))| {
            (
                key,
                PriceBucket {
                    count,
                    average: total / count as f64,
                },
            )
        })
        .collect()
}
