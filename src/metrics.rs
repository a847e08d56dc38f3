// src/metrics.rs
use std::net::SocketAddr;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::ConfigError;

/// Install the Prometheus recorder with its own HTTP listener serving `/metrics`.
/// Must be called from within a tokio runtime.
pub fn install_exporter(listen: &str) -> Result<(), ConfigError> {
    let addr: SocketAddr = listen
        .trim()
        .parse()
        .map_err(|e| ConfigError::invalid_setting("metrics.listen", format!("{listen:?}: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ConfigError::invalid_setting("metrics.listen", e.to_string()))?;

    crate::ingest::ensure_metrics_described();
    tracing::info!(target: "ingest", %addr, "prometheus exporter listening");
    Ok(())
}

/// Install the recorder without a listener; render the exposition text via the handle.
pub fn install_recorder() -> Result<PrometheusHandle, ConfigError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ConfigError::invalid_setting("metrics", e.to_string()))?;
    crate::ingest::ensure_metrics_described();
    Ok(handle)
}
