//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Debrid providers (requests, retries, proxy failovers, link generation)
//! - Cache store (lookups by table and outcome)
//! - Search coordination (lock acquisition outcomes)

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};

/// Provider requests total by service, operation and status.
pub static PROVIDER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "unfetter_provider_requests_total",
            "Total debrid provider requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// Retry attempts total by service and operation.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("unfetter_retry_attempts_total", "Total retry attempts"),
        &["service", "operation"],
    )
    .unwrap()
});

/// Proxy failovers total by service.
pub static PROXY_FAILOVERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "unfetter_proxy_failovers_total",
            "Total switches to the configured egress proxy",
        ),
        &["service"],
    )
    .unwrap()
});

/// Download links generated by service and result.
pub static LINKS_GENERATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "unfetter_links_generated_total",
            "Total download link generations",
        ),
        &["service", "result"], // result: "success", "failed"
    )
    .unwrap()
});

/// Cache lookups by table and outcome.
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("unfetter_cache_lookups_total", "Total cache lookups"),
        &["table", "result"], // result: "hit", "miss"
    )
    .unwrap()
});

/// Search lock acquisitions by outcome.
pub static SEARCH_LOCKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "unfetter_search_locks_total",
            "Total ongoing-search lock acquisition attempts",
        ),
        &["result"], // "acquired", "busy"
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(PROVIDER_REQUESTS.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(PROXY_FAILOVERS.clone()),
        Box::new(LINKS_GENERATED.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(SEARCH_LOCKS.clone()),
    ]
}
