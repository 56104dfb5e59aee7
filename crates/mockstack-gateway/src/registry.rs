//! Named collection of service mocks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use mockstack_protocol::ServiceMock;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::RoutingError;
use crate::resolver::{Resolution, resolve_service};

/// The set of mocks a server routes to, keyed by service name.
///
/// One registry is built per server, so independent servers in the same
/// process never share state.
#[derive(Default)]
pub struct MockRegistry {
    mocks: RwLock<BTreeMap<String, Arc<dyn ServiceMock>>>,
}

impl fmt::Debug for MockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRegistry")
            .field("services", &self.names())
            .finish()
    }
}

impl MockRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with `mocks`.
    #[must_use]
    pub fn with_mocks(mocks: impl IntoIterator<Item = Arc<dyn ServiceMock>>) -> Self {
        let registry = Self::new();
        for mock in mocks {
            registry.register(mock);
        }
        registry
    }

    /// Add a mock, replacing and returning any mock already registered
    /// under the same name. Routing uses the new mock immediately.
    pub fn register(&self, mock: Arc<dyn ServiceMock>) -> Option<Arc<dyn ServiceMock>> {
        let name = mock.name().to_owned();
        let replaced = self.mocks.write().insert(name.clone(), mock);
        if replaced.is_some() {
            info!(service = %name, "replaced service mock");
        } else {
            debug!(service = %name, "registered service mock");
        }
        replaced
    }

    /// The mock registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceMock>> {
        self.mocks.read().get(name).cloned()
    }

    /// Whether a mock is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.mocks.read().contains_key(name)
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.mocks.read().keys().cloned().collect()
    }

    /// Number of registered mocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mocks.read().len()
    }

    /// Whether no mock is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mocks.read().is_empty()
    }

    /// Resolve the mock responsible for a request with these headers.
    pub fn lookup(
        &self,
        headers: &HeaderMap,
    ) -> Result<(Arc<dyn ServiceMock>, Resolution), RoutingError> {
        let resolution = resolve_service(headers);
        match self.get(&resolution.service) {
            Some(mock) => Ok((mock, resolution)),
            None => Err(RoutingError::UnknownService(resolution.service)),
        }
    }

    /// Pick the mock for `request`, or the plain-text 400 to answer with.
    ///
    /// Only the headers are consulted, so the body may still be streaming.
    pub fn select<B>(
        &self,
        request: &http::Request<B>,
    ) -> Result<Arc<dyn ServiceMock>, http::Response<Bytes>> {
        match self.lookup(request.headers()) {
            Ok((mock, resolution)) => {
                debug!(
                    service = %resolution.service,
                    source = ?resolution.source,
                    method = %request.method(),
                    path = %request.uri().path(),
                    "routing request"
                );
                Ok(mock)
            }
            Err(err) => {
                warn!(error = %err, path = %request.uri().path(), "unroutable request");
                Err(routing_error_response(&err))
            }
        }
    }

    /// Route a fully-buffered request to its mock.
    ///
    /// Requests that resolve to no registered mock get a plain-text 400.
    pub fn route(&self, request: http::Request<Bytes>) -> http::Response<Bytes> {
        match self.select(&request) {
            Ok(mock) => mock.handle(request),
            Err(response) => response,
        }
    }

    /// Reset every registered mock.
    pub fn reset_all(&self) {
        let mocks: Vec<Arc<dyn ServiceMock>> = self.mocks.read().values().cloned().collect();
        for mock in &mocks {
            mock.reset();
        }
        info!(services = mocks.len(), "reset all service mocks");
    }
}

/// Plain-text 400 for requests the gateway cannot route.
#[must_use]
fn routing_error_response(err: &RoutingError) -> http::Response<Bytes> {
    let mut response = http::Response::new(Bytes::from(err.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
