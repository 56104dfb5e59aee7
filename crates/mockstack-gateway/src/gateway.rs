//! hyper service in front of the [`MockRegistry`].
//!
//! Two control endpoints are intercepted before service resolution:
//!
//! - `GET /_mockstack/health` returns `{"services": {"<name>": "running", ...}}`.
//! - `POST /_mockstack/reset` resets every registered mock.
//!
//! Everything else is resolved to a mock, buffered, and handed over.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use mockstack_protocol::ServiceError;
use tracing::warn;

use crate::registry::MockRegistry;

/// Health endpoint path.
pub const HEALTH_PATH: &str = "/_mockstack/health";

/// Reset endpoint path.
pub const RESET_PATH: &str = "/_mockstack/reset";

/// Server version reported by the health endpoint.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Type-erased response body.
pub type GatewayBody = BoxBody<Bytes, io::Error>;

/// Wrap buffered bytes in a [`GatewayBody`].
pub fn gateway_body(bytes: Bytes) -> GatewayBody {
    Full::new(bytes)
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Routes each connection's requests through a shared registry.
#[derive(Debug, Clone)]
pub struct GatewayService {
    registry: Arc<MockRegistry>,
}

impl GatewayService {
    /// Create a gateway over `registry`.
    #[must_use]
    pub fn new(registry: Arc<MockRegistry>) -> Self {
        Self { registry }
    }

    /// Registered service names.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.registry.names()
    }
}

impl Service<http::Request<Incoming>> for GatewayService {
    type Response = http::Response<GatewayBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let registry = Arc::clone(&self.registry);
        Box::pin(async move { Ok(dispatch(&registry, req).await.map(gateway_body)) })
    }
}

/// Handle one request end to end.
async fn dispatch(registry: &MockRegistry, req: http::Request<Incoming>) -> http::Response<Bytes> {
    if let Some(response) = control_response(registry, req.method(), req.uri().path()) {
        return response;
    }

    let mock = match registry.select(&req) {
        Ok(mock) => mock,
        Err(response) => return response,
    };

    let (parts, body) = req.into_parts();
    match body.collect().await {
        Ok(collected) => mock.handle(http::Request::from_parts(parts, collected.to_bytes())),
        Err(e) => {
            warn!(service = mock.name(), error = %e, "failed to read request body");
            mock.reject(
                &parts,
                &ServiceError::internal(format!("failed to read request body: {e}")),
            )
        }
    }
}

/// Answer the health and reset endpoints; `None` for anything else.
fn control_response(
    registry: &MockRegistry,
    method: &Method,
    path: &str,
) -> Option<http::Response<Bytes>> {
    match (method, path) {
        (&Method::GET, HEALTH_PATH) => Some(health_response(registry)),
        (&Method::POST, RESET_PATH) => {
            registry.reset_all();
            Some(json_response(&serde_json::json!({ "reset": registry.names() })))
        }
        _ => None,
    }
}

/// `{"services": {...}, "version": ...}` for every registered mock.
fn health_response(registry: &MockRegistry) -> http::Response<Bytes> {
    let services: serde_json::Map<String, serde_json::Value> = registry
        .names()
        .into_iter()
        .map(|name| (name, serde_json::Value::from("running")))
        .collect();
    json_response(&serde_json::json!({ "services": services, "version": VERSION }))
}

fn json_response(body: &serde_json::Value) -> http::Response<Bytes> {
    let mut response = http::Response::new(Bytes::from(body.to_string()));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
