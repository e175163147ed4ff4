use tracing::trace;

// Trace-based metrics helpers. The Prometheus recorder is installed in main;
// these cover the per-stage and per-cache signals that have no macro yet.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "magpie.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "magpie.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn cache_event(key: &str, kind: &'static str) {
    trace!(
        target = "magpie.metrics",
        key = key,
        kind = kind,
        "market_cache_event"
    );
}
