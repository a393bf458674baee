//! Prometheus metrics for session management.
//!
//! Provides metrics for:
//! - Session cache operations (hits, misses, errors)
//! - Published session lifecycle events
//! - Sweeper removals and durable mirror writes
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use std::{net::SocketAddr, sync::OnceLock};

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle, kept for rendering metrics on demand.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and spawn its scrape listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let listen: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid listen address: {}", e)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(listen)
        .build()
        .map_err(MetricsError::Install)?;
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Setup(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus metrics listener stopped");
        }
    });

    tracing::info!(listen = %listen, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a cache operation.
///
/// # Arguments
/// * `cache_type` - The kind of data accessed (e.g., "session")
/// * `operation` - The operation being performed (e.g., "get", "touch", "rotate")
/// * `result` - The result of the operation (e.g., "hit", "miss", "success", "error")
pub fn record_cache_operation(cache_type: &str, operation: &str, result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "cache_operations_total",
            "cache_type" => cache_type.to_string(),
            "operation" => operation.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (cache_type, operation, result);
    }
}

/// Record a published session lifecycle event.
pub fn record_session_event(event_type: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("session_events_total", "type" => event_type.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = event_type;
    }
}

/// Record the removals of one sweeper pass.
pub fn record_sweep(stale_removed: usize, expired: usize) {
    #[cfg(feature = "prometheus")]
    {
        counter!("session_sweeps_total").increment(1);
        counter!("session_sweep_removals_total", "reason" => "stale")
            .increment(stale_removed as u64);
        counter!("session_sweep_removals_total", "reason" => "expired").increment(expired as u64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (stale_removed, expired);
    }
}

/// Record a durable mirror write.
///
/// # Arguments
/// * `operation` - The repository call (e.g., "upsert", "update_status")
/// * `result` - "success" or "error"
pub fn record_persistence_write(operation: &str, result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "session_persistence_writes_total",
            "operation" => operation.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (operation, result);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to build metrics exporter: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_cache_operation("session", "get", "hit");
        record_session_event("session_created");
        record_sweep(1, 2);
        record_persistence_write("upsert", "error");
    }

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(init_metrics(&config).is_ok());
    }
}
