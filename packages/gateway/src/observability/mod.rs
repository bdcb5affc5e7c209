// packages/gateway/src/observability/mod.rs
//! Logging and metrics setup
//!
//! Tracing goes through `tracing-subscriber` with an `EnvFilter`; `RUST_LOG`
//! takes precedence over the configured filter. Metrics are recorded with the
//! `metrics` facade and exported over HTTP for Prometheus when a listener
//! address is configured. Without an installed recorder the counters are no-ops.

use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{GatewayError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Metric names emitted by the gateway
pub mod names {
    /// Requests seen by the gateway, labelled by `class`
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";

    /// Refresh calls issued, labelled by `outcome`
    pub const REFRESH_TOTAL: &str = "gateway_refresh_total";

    /// Callers that parked on an in-flight refresh
    pub const REFRESH_JOINED_TOTAL: &str = "gateway_refresh_joined_total";

    /// Requests retried after a successful refresh
    pub const RETRIES_TOTAL: &str = "gateway_retries_total";

    /// Session teardowns after a failed refresh
    pub const SESSION_TEARDOWNS_TOTAL: &str = "gateway_session_teardowns_total";
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| GatewayError::ObservabilityFailed(format!("Invalid log filter: {}", e)))?;

    let installed = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };

    installed.map_err(|e| GatewayError::ObservabilityFailed(e.to_string()))
}

/// Install the Prometheus exporter if a listener address is configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(addr) = config.metrics_addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| GatewayError::ObservabilityFailed(format!("Metrics exporter: {}", e)))?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}
