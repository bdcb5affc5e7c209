// packages/gateway/src/interception/gateway.rs
//! Authenticated request gateway
//!
//! Wraps the transport behind a [`TransportEntry`] so that every request
//! carries the session cookies, and a 401 on a guarded target triggers one
//! shared session refresh followed by a single retry.
//!
//! ```text
//! send(request)
//!   ├─ OPTIONS            → original transport, untouched
//!   ├─ exempt target      → original transport + cookies
//!   └─ guarded target     → original transport + cookies
//!                             └─ 401 → single-flight refresh
//!                                   ├─ ok     → retry once, return retry
//!                                   └─ failed → teardown, return the 401
//! ```

use crate::interception::exemptions::{ExemptionTable, RequestClass};
use crate::interception::refresh::{RefreshCoordinator, RefreshOutcome, RefreshStats};
use crate::interception::request::{CredentialsMode, GatewayRequest, GatewayResponse};
use crate::interception::transport::{Transport, TransportEntry, TransportFuture};
use crate::observability::names;
use crate::session::Session;
use crate::utils::config::InterceptionConfig;
use crate::utils::errors::{GatewayError, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, debug_span, error, info, warn, Instrument};
use ulid::Ulid;

/// Send `request` with the session cookies and keep whatever the response sets
async fn send_with_credentials(
    transport: &dyn Transport,
    session: &Session,
    mut request: GatewayRequest,
) -> Result<GatewayResponse> {
    request.credentials = CredentialsMode::Include;
    session.cookies().attach(&mut request.headers);

    let response = transport.send(request).await?;
    session.cookies().absorb(&response.headers);

    Ok(response)
}

/// One refresh call; faults are downgraded to [`RefreshOutcome::Failed`]
async fn attempt_refresh(
    transport: &dyn Transport,
    session: &Session,
    refresh_path: &str,
) -> RefreshOutcome {
    let request = GatewayRequest::post(refresh_path)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match send_with_credentials(transport, session, request).await {
        Ok(response) if response.is_success() => {
            info!("Session refresh succeeded");
            RefreshOutcome::Refreshed
        }
        Ok(response) => {
            warn!("Session refresh rejected with {}", response.status);
            RefreshOutcome::Failed
        }
        Err(e) => {
            error!("Session refresh error: {}", e);
            RefreshOutcome::Failed
        }
    }
}

/// `POST` the auth-status endpoint; `true` iff it answers 2xx
async fn probe_auth_status(transport: &dyn Transport, session: &Session, path: &str) -> bool {
    match send_with_credentials(transport, session, GatewayRequest::post(path)).await {
        Ok(response) => response.is_success(),
        Err(e) => {
            debug!("Auth status probe failed: {}", e);
            false
        }
    }
}

/// The transport installed into the entry point while the gateway is active
pub struct AuthenticatedTransport {
    /// Transport captured at install time; exempt, refresh and retried
    /// requests go straight to it
    original: Arc<dyn Transport>,
    exemptions: Arc<ExemptionTable>,
    session: Arc<Session>,
    coordinator: Arc<RefreshCoordinator>,
    refresh_path: String,
    auth_status_path: String,
}

impl AuthenticatedTransport {
    pub fn original(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.original)
    }

    /// Send a request through the gateway
    pub async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let span = debug_span!(
            "gateway_send",
            request_id = %Ulid::new(),
            method = %request.method,
            target = %request.target,
        );

        self.dispatch(request).instrument(span).await
    }

    async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let class = self.exemptions.classify(&request.method, &request.target);
        metrics::counter!(names::REQUESTS_TOTAL, "class" => class.as_str()).increment(1);

        match class {
            RequestClass::Preflight => {
                debug!("Skipping pre-flight request");
                self.original.send(request).await
            }
            RequestClass::Exempt => {
                debug!("Exempt target, no refresh handling");
                send_with_credentials(self.original.as_ref(), &self.session, request).await
            }
            RequestClass::Guarded => self.send_guarded(request).await,
        }
    }

    async fn send_guarded(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let response =
            send_with_credentials(self.original.as_ref(), &self.session, request.clone()).await?;

        if !response.is_unauthorized() || self.exemptions.is_refresh_endpoint(&request.target) {
            return Ok(response);
        }

        info!("Unauthorized, attempting session refresh");
        if self.refresh_session().await.is_success() {
            info!("Session refreshed, retrying request");
            metrics::counter!(names::RETRIES_TOTAL).increment(1);
            send_with_credentials(self.original.as_ref(), &self.session, request).await
        } else {
            warn!("Session refresh failed, returning original response");
            Ok(response)
        }
    }

    /// Join or start a refresh cycle
    ///
    /// Teardown is the cycle's failure hook, so a failed or panicking refresh
    /// clears the session and redirects once no matter how many callers were
    /// waiting on it.
    async fn refresh_session(&self) -> RefreshOutcome {
        let original = Arc::clone(&self.original);
        let session = Arc::clone(&self.session);
        let refresh_path = self.refresh_path.clone();
        let teardown_session = Arc::clone(&self.session);

        self.coordinator
            .run_with_failure_hook(
                move || async move {
                    attempt_refresh(original.as_ref(), &session, &refresh_path).await
                },
                move || {
                    teardown_session.teardown();
                },
            )
            .await
    }

    pub async fn check_auth_status(&self) -> bool {
        probe_auth_status(self.original.as_ref(), &self.session, &self.auth_status_path).await
    }
}

impl Transport for AuthenticatedTransport {
    fn send(&self, request: GatewayRequest) -> TransportFuture<'_> {
        Box::pin(self.execute(request))
    }
}

/// Authenticated request gateway
///
/// Owned by the application's composition root. [`install`](Self::install)
/// swaps the authenticated transport into the entry point,
/// [`uninstall`](Self::uninstall) (or dropping the gateway) puts the original
/// back.
pub struct AuthGateway {
    entry: Arc<TransportEntry>,
    exemptions: Arc<ExemptionTable>,
    session: Arc<Session>,
    coordinator: Arc<RefreshCoordinator>,
    refresh_path: String,
    auth_status_path: String,

    /// `Some` while active
    installed: Mutex<Option<Arc<AuthenticatedTransport>>>,
}

impl AuthGateway {
    pub fn new(entry: Arc<TransportEntry>, session: Arc<Session>, config: &InterceptionConfig) -> Self {
        Self {
            entry,
            exemptions: Arc::new(ExemptionTable::from_config(config)),
            session,
            coordinator: Arc::new(RefreshCoordinator::new()),
            refresh_path: config.refresh_path.clone(),
            auth_status_path: config.auth_status_path.clone(),
            installed: Mutex::new(None),
        }
    }

    /// Start intercepting requests sent through the entry point
    pub fn install(&self) {
        let mut installed = self.installed.lock();
        if installed.is_some() {
            debug!("Auth gateway already active");
            return;
        }

        let transport = Arc::new(AuthenticatedTransport {
            original: self.entry.current(),
            exemptions: Arc::clone(&self.exemptions),
            session: Arc::clone(&self.session),
            coordinator: Arc::clone(&self.coordinator),
            refresh_path: self.refresh_path.clone(),
            auth_status_path: self.auth_status_path.clone(),
        });

        self.entry.replace(Arc::clone(&transport) as Arc<dyn Transport>);
        *installed = Some(transport);

        info!("Auth gateway activated");
    }

    /// Restore the original transport
    pub fn uninstall(&self) {
        let Some(transport) = self.installed.lock().take() else {
            return;
        };

        self.entry.replace(transport.original());
        info!("Auth gateway deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.installed.lock().is_some()
    }

    /// Send through the gateway directly, without going via the entry point
    pub async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let transport = self
            .installed
            .lock()
            .clone()
            .ok_or(GatewayError::NotInstalled)?;

        transport.execute(request).await
    }

    /// Whether the backend accepts the current session
    ///
    /// Uses the original transport, never triggering a refresh.
    pub async fn check_auth_status(&self) -> bool {
        let installed = self.installed.lock().clone();
        let transport = match installed {
            Some(transport) => transport.original(),
            None => self.entry.current(),
        };

        probe_auth_status(transport.as_ref(), &self.session, &self.auth_status_path).await
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.coordinator.stats()
    }

    pub fn exemptions(&self) -> &ExemptionTable {
        &self.exemptions
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for AuthGateway {
    fn drop(&mut self) {
        self.uninstall();
    }
}
