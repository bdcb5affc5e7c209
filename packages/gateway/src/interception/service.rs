// packages/gateway/src/interception/service.rs
//! `tower::Service` adapter over the transport entry point

use crate::interception::request::{GatewayRequest, GatewayResponse};
use crate::interception::transport::TransportEntry;
use crate::utils::errors::GatewayError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Sends each request through whatever transport the entry currently holds
#[derive(Clone)]
pub struct GatewayService {
    entry: Arc<TransportEntry>,
}

impl GatewayService {
    pub fn new(entry: Arc<TransportEntry>) -> Self {
        Self { entry }
    }
}

impl Service<GatewayRequest> for GatewayService {
    type Response = GatewayResponse;
    type Error = GatewayError;
    type Future = BoxFuture<'static, Result<GatewayResponse, GatewayError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: GatewayRequest) -> Self::Future {
        let entry = Arc::clone(&self.entry);
        Box::pin(async move { entry.send(request).await })
    }
}
