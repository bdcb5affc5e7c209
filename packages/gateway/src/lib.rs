// packages/gateway/src/lib.rs
//! MTG Elo Session Gateway Library
//!
//! Authenticated request gateway for the ranking frontend: every outbound
//! request carries the session cookies, and an expired session is refreshed
//! once and shared by every request that noticed it.
//!
//! # Architecture
//!
//! The gateway is structured into several key modules:
//!
//! - **interception**: transports, exemptions, single-flight refresh, gateway
//! - **session**: cookie jar, navigation and session teardown
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and error types

// Public module exports
pub mod interception;
pub mod observability;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use interception::gateway::{AuthGateway, AuthenticatedTransport};
pub use interception::request::{GatewayRequest, GatewayResponse};
pub use interception::transport::{HyperTransport, Transport, TransportEntry};
pub use session::Session;
pub use utils::config::GatewayConfig;
pub use utils::errors::{GatewayError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
