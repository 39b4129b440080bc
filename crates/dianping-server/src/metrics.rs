//! Prometheus metrics for the coordination layer.
//!
//! This module provides:
//! - Cache metrics (hits, misses, null-marker hits, loader calls, rebuilds)
//! - Distributed lock metrics (acquired, contended, lost before release)
//! - Id generator and seckill outcome counters
//!
//! Without an installed recorder every `record_*` call is a no-op.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_NULL_HITS_TOTAL: &str = "cache_null_hits_total";
    pub const CACHE_STALE_READS_TOTAL: &str = "cache_stale_reads_total";
    pub const CACHE_LOADS_TOTAL: &str = "cache_loads_total";
    pub const CACHE_REBUILDS_TOTAL: &str = "cache_rebuilds_total";

    // Lock metrics
    pub const LOCK_ACQUIRED_TOTAL: &str = "lock_acquired_total";
    pub const LOCK_CONTENDED_TOTAL: &str = "lock_contended_total";
    pub const LOCK_RELEASE_MISSED_TOTAL: &str = "lock_release_missed_total";

    // Id generator metrics
    pub const IDS_ISSUED_TOTAL: &str = "ids_issued_total";

    // Seckill metrics
    pub const SECKILL_OUTCOMES_TOTAL: &str = "seckill_outcomes_total";
    pub const ORDER_WRITE_FAILURES_TOTAL: &str = "order_write_failures_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit(prefix: &str) {
    counter!(names::CACHE_HITS_TOTAL, "prefix" => prefix.to_string()).increment(1);
}

pub fn record_cache_miss(prefix: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "prefix" => prefix.to_string()).increment(1);
}

/// A read answered by the null marker, without touching the system of record.
pub fn record_null_hit(prefix: &str) {
    counter!(names::CACHE_NULL_HITS_TOTAL, "prefix" => prefix.to_string()).increment(1);
}

pub fn record_stale_read(prefix: &str) {
    counter!(names::CACHE_STALE_READS_TOTAL, "prefix" => prefix.to_string()).increment(1);
}

/// One loader invocation against the system of record.
pub fn record_cache_load(prefix: &str) {
    counter!(names::CACHE_LOADS_TOTAL, "prefix" => prefix.to_string()).increment(1);
}

/// A background logical-expiry rebuild finished with `outcome`
/// (`rebuilt`, `removed`, `skipped` or `failed`).
pub fn record_rebuild(prefix: &str, outcome: &'static str) {
    counter!(
        names::CACHE_REBUILDS_TOTAL,
        "prefix" => prefix.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

// =============================================================================
// Lock Metrics
// =============================================================================

pub fn record_lock_attempt(acquired: bool) {
    if acquired {
        counter!(names::LOCK_ACQUIRED_TOTAL).increment(1);
    } else {
        counter!(names::LOCK_CONTENDED_TOTAL).increment(1);
    }
}

/// A release found the lock no longer held by its owner (lease expired).
pub fn record_lock_release_missed() {
    counter!(names::LOCK_RELEASE_MISSED_TOTAL).increment(1);
}

// =============================================================================
// Id and Seckill Metrics
// =============================================================================

pub fn record_id_issued(prefix: &str) {
    counter!(names::IDS_ISSUED_TOTAL, "prefix" => prefix.to_string()).increment(1);
}

pub fn record_seckill_outcome(outcome: &'static str) {
    counter!(names::SECKILL_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_order_write_failure(reason: &'static str) {
    counter!(names::ORDER_WRITE_FAILURES_TOTAL, "reason" => reason).increment(1);
}
