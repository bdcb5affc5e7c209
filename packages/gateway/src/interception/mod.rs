// packages/gateway/src/interception/mod.rs
//! Request interception layer
//!
//! - **Transport**: the HTTP client and the swappable process entry point
//! - **Exemptions**: which targets skip credentials or 401 handling
//! - **Refresh**: single-flight session refresh shared by concurrent callers
//! - **Gateway**: install/uninstall and the authenticated send path
//! - **Service**: `tower::Service` adapter over the entry point
//!
//! # Architecture
//!
//! ```text
//! Call site
//!     │
//!     └─ TransportEntry ──► AuthenticatedTransport ──► original transport
//!                                 │                         ▲
//!                                 └─ 401 ─► RefreshCoordinator ─┘
//!                                              (one refresh in flight)
//! ```

pub mod exemptions;
pub mod gateway;
pub mod refresh;
pub mod request;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use exemptions::{ExemptionTable, MatchMode, RequestClass};
pub use gateway::{AuthGateway, AuthenticatedTransport};
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshStats};
pub use request::{CredentialsMode, GatewayRequest, GatewayResponse};
pub use service::GatewayService;
pub use transport::{HyperTransport, Transport, TransportEntry};
