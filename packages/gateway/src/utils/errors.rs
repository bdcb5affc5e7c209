// packages/gateway/src/utils/errors.rs
//! Error types for the gateway

use thiserror::Error;

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The underlying transport could not complete the exchange
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// `send` was called before `install` (or after `uninstall`)
    #[error("Authenticated gateway is not installed")]
    NotInstalled,

    #[error("Observability setup failed: {0}")]
    ObservabilityFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
