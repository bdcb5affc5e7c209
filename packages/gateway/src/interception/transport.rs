// packages/gateway/src/interception/transport.rs
//! Transports and the process-wide transport entry point
//!
//! Every call site sends through a [`TransportEntry`]. The entry holds
//! whichever [`Transport`] is currently installed: the raw [`HyperTransport`]
//! at startup, the authenticated wrapper once the gateway is installed.

use crate::interception::request::{CredentialsMode, GatewayRequest, GatewayResponse};
use crate::utils::errors::{GatewayError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::header::COOKIE;
use hyper::{Request, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub type TransportFuture<'a> = BoxFuture<'a, Result<GatewayResponse>>;

/// Something that can perform one HTTP exchange
pub trait Transport: Send + Sync {
    fn send(&self, request: GatewayRequest) -> TransportFuture<'_>;
}

/// Swappable process-wide entry point
pub struct TransportEntry {
    current: RwLock<Arc<dyn Transport>>,
}

impl TransportEntry {
    pub fn new(initial: Arc<dyn Transport>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// The transport requests are currently routed to
    pub fn current(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.current.read())
    }

    /// Install `transport`, returning the one it displaced
    pub(crate) fn replace(&self, transport: Arc<dyn Transport>) -> Arc<dyn Transport> {
        std::mem::replace(&mut *self.current.write(), transport)
    }

    pub async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        // Clone out of the lock so it is not held across the await
        let transport = self.current();
        transport.send(request).await
    }
}

/// Resolve a request target against the API base URL
pub fn resolve_target(base_url: &str, target: &str) -> Result<Uri> {
    let absolute = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else if target.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), target)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), target)
    };

    absolute
        .parse::<Uri>()
        .map_err(|e| GatewayError::InvalidRequest(format!("Bad target {:?}: {}", target, e)))
}

/// HTTP(S) transport backed by the hyper-util pooled client
///
/// `https` targets are verified against the webpki root store; `http`
/// targets go out in plain text. The `Cookie` header only travels when the
/// request's [`CredentialsMode`] is `Include`.
pub struct HyperTransport {
    base_url: String,
    timeout: Duration,
    http_client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HyperTransport {
    /// Create a transport resolving relative targets against `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let http_client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            http_client,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let uri = resolve_target(&self.base_url, &request.target)?;
        debug!("{} {}", request.method, uri);

        let mut headers = request.headers;
        if request.credentials == CredentialsMode::Omit {
            headers.remove(COOKIE);
        }

        let mut http_req = Request::new(Full::new(request.body));
        *http_req.method_mut() = request.method;
        *http_req.uri_mut() = uri;
        *http_req.headers_mut() = headers;

        let response = tokio::time::timeout(self.timeout, self.http_client.request(http_req))
            .await
            .map_err(|_| {
                GatewayError::TransportFailed(format!("Request timed out after {:?}", self.timeout))
            })?
            .map_err(|e| GatewayError::TransportFailed(format!("Request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| GatewayError::TransportFailed(format!("Response body error: {}", e)))?
            .to_bytes();

        Ok(GatewayResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: GatewayRequest) -> TransportFuture<'_> {
        Box::pin(self.execute(request))
    }
}
