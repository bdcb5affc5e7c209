// packages/gateway/src/main.rs
//! MTG Elo Session Gateway
//!
//! Composes the transport, session and gateway the way the frontend does at
//! startup, checks whether the stored session is still accepted, then sends a
//! GET for every target path given on the command line.

use anyhow::Result;
use elo_session_gateway::observability::{init_metrics, init_tracing};
use elo_session_gateway::session::{CookieJar, LocationState, Navigator};
use elo_session_gateway::utils::config::GatewayConfig;
use elo_session_gateway::{AuthGateway, GatewayRequest, HyperTransport, Session, TransportEntry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = GatewayConfig::load()?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    info!("Starting MTG Elo session gateway v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    let transport = HyperTransport::new(config.api.full_api_url())
        .with_timeout(Duration::from_millis(config.interception.request_timeout_ms));
    let entry = Arc::new(TransportEntry::new(Arc::new(transport)));

    let session = Arc::new(Session::new(
        Arc::new(CookieJar::new()),
        Arc::new(LocationState::default()) as Arc<dyn Navigator>,
        config.session.clone(),
    ));

    let gateway = AuthGateway::new(Arc::clone(&entry), Arc::clone(&session), &config.interception);
    gateway.install();

    let authenticated = gateway.check_auth_status().await;
    info!("Session authenticated: {}", authenticated);

    for target in std::env::args().skip(1) {
        match entry.send(GatewayRequest::get(target.as_str())).await {
            Ok(response) if response.is_success() => {
                info!("GET {} -> {} ({} bytes)", target, response.status, response.body.len());
            }
            Ok(response) => warn!("GET {} -> {}", target, response.status),
            Err(e) => error!("GET {} failed: {}", target, e),
        }
    }

    let stats = gateway.refresh_stats();
    info!("Refresh cycles: {}", stats.cycles);
    if session.navigator().current_path() == config.session.sign_in_route {
        warn!("Session ended, sign-in required");
    }

    gateway.uninstall();
    Ok(())
}
