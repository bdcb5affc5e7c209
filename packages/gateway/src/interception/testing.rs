// packages/gateway/src/interception/testing.rs
//! Scripted backend for gateway tests
//!
//! Models the REST server's session handling: every request needs the
//! current access token, the refresh endpoint rotates it, and the refresh
//! call can be held open, rejected or faulted.

use crate::interception::request::{CredentialsMode, GatewayRequest, GatewayResponse};
use crate::interception::transport::{Transport, TransportFuture};
use crate::session::{CookieJar, SessionCookie};
use crate::utils::errors::{GatewayError, Result};
use hyper::header::{HeaderValue, COOKIE, SET_COOKIE};
use hyper::{Method, StatusCode};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Yield until `condition` holds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// What the backend saw
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub target: String,
    pub cookie: Option<String>,
    pub credentials: CredentialsMode,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum RefreshBehavior {
    /// Rotate the access token and return 200
    Rotate,
    Status(StatusCode),
    Fault,
    /// The handler itself panics
    Crash,
}

pub(crate) struct ScriptedBackend {
    refresh_path: String,

    /// Generation of the only valid access token (`token-<n>`)
    generation: Mutex<u64>,
    refresh: Mutex<RefreshBehavior>,
    refresh_gate: Option<Arc<Semaphore>>,
    always_unauthorized: Mutex<Vec<String>>,
    faulty: Mutex<Vec<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            refresh_path: "/api/auth/refresh/".to_string(),
            generation: Mutex::new(1),
            refresh: Mutex::new(RefreshBehavior::Rotate),
            refresh_gate: None,
            always_unauthorized: Mutex::new(Vec::new()),
            faulty: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Hold every refresh call until a permit is added to `gate`
    pub fn with_refresh_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.refresh_gate = Some(gate);
        self
    }

    pub fn with_refresh(self, behavior: RefreshBehavior) -> Self {
        *self.refresh.lock() = behavior;
        self
    }

    /// `target` answers 401 even with a valid token
    pub fn always_unauthorized(&self, target: &str) {
        self.always_unauthorized.lock().push(target.to_string());
    }

    /// `target` fails at the transport level
    pub fn fault(&self, target: &str) {
        self.faulty.lock().push(target.to_string());
    }

    /// Invalidate the current access token server-side
    pub fn expire_session(&self) {
        *self.generation.lock() += 1;
    }

    /// Put a stale access token and a refresh token into `jar`
    pub fn issue_stale_session(&self, jar: &CookieJar) {
        let stale = *self.generation.lock() - 1;
        jar.set(SessionCookie::new("access", format!("token-{}", stale)));
        jar.set(SessionCookie::new("refresh", "r0"));
    }

    /// Put the currently valid access token into `jar`
    pub fn issue_valid_session(&self, jar: &CookieJar) {
        let current = *self.generation.lock();
        jar.set(SessionCookie::new("access", format!("token-{}", current)));
        jar.set(SessionCookie::new("refresh", "r0"));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, target: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.target == target)
            .count()
    }

    pub fn refresh_calls(&self) -> usize {
        self.requests_to(&self.refresh_path)
    }

    fn authorized(&self, cookie: Option<&str>) -> bool {
        let expected = format!("access=token-{}", *self.generation.lock());
        cookie.map_or(false, |c| c.split("; ").any(|pair| pair == expected))
    }

    async fn handle(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let cookie = match request.credentials {
            CredentialsMode::Include => request
                .headers
                .get(COOKIE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            CredentialsMode::Omit => None,
        };

        self.requests.lock().push(RecordedRequest {
            method: request.method.clone(),
            target: request.target.clone(),
            cookie: cookie.clone(),
            credentials: request.credentials,
        });

        if self.faulty.lock().contains(&request.target) {
            return Err(GatewayError::TransportFailed("connection reset".to_string()));
        }

        if request.target == self.refresh_path {
            if let Some(gate) = &self.refresh_gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| GatewayError::TransportFailed(e.to_string()))?;
            }

            let behavior = *self.refresh.lock();
            return match behavior {
                RefreshBehavior::Rotate => {
                    let generation = {
                        let mut generation = self.generation.lock();
                        *generation += 1;
                        *generation
                    };
                    let set_cookie = format!("access=token-{}; Path=/; HttpOnly", generation);
                    Ok(GatewayResponse::new(StatusCode::OK).with_header(
                        SET_COOKIE,
                        HeaderValue::from_str(&set_cookie)
                            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?,
                    ))
                }
                RefreshBehavior::Status(status) => Ok(GatewayResponse::new(status)),
                RefreshBehavior::Fault => {
                    Err(GatewayError::TransportFailed("refresh unreachable".to_string()))
                }
                RefreshBehavior::Crash => panic!("refresh handler crashed"),
            };
        }

        let forced = self.always_unauthorized.lock().contains(&request.target);
        if forced || !self.authorized(cookie.as_deref()) {
            return Ok(GatewayResponse::new(StatusCode::UNAUTHORIZED)
                .with_body(r#"{"detail":"Authentication credentials were not provided."}"#));
        }

        Ok(GatewayResponse::new(StatusCode::OK).with_body(r#"{"ok":true}"#))
    }
}

impl Transport for ScriptedBackend {
    fn send(&self, request: GatewayRequest) -> TransportFuture<'_> {
        Box::pin(self.handle(request))
    }
}
