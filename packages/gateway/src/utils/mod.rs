// packages/gateway/src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::GatewayConfig;
pub use errors::{GatewayError, Result};
