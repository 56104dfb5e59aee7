//! Dialect-neutral request and response shapes.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use mockstack_core::Params;

/// Host used in generated URLs when a request carries no `Host` header.
pub const DEFAULT_HOST: &str = "localhost:4566";

/// A decoded operation invocation.
#[derive(Debug, Clone, Default)]
pub struct Call {
    /// Operation name, e.g. `CreateQueue`.
    pub operation: String,
    /// Named parameters merged from body, path labels and query string.
    pub params: Params,
    /// Raw request body, for operations whose payload is a blob.
    pub body: Bytes,
    /// Request headers.
    pub headers: HeaderMap,
}

impl Call {
    /// A call with the given operation and parameters.
    #[must_use]
    pub fn new(operation: impl Into<String>, params: Params) -> Self {
        Self {
            operation: operation.into(),
            params,
            ..Self::default()
        }
    }

    /// The request's `Host` header, or [`DEFAULT_HOST`].
    #[must_use]
    pub fn host(&self) -> &str {
        self.header("host").unwrap_or(DEFAULT_HOST)
    }

    /// A request header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The successful result of an operation.
#[derive(Debug, Clone, Default)]
pub struct Output {
    /// Structured response fields.
    pub params: Params,
    /// Overrides the dialect's default success status.
    pub status: Option<StatusCode>,
    /// Extra response headers.
    pub headers: HeaderMap,
    /// Raw payload sent instead of an encoded `params` document.
    pub raw: Option<Bytes>,
}

impl Output {
    /// A structured response.
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// An empty response.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A raw payload response.
    #[must_use]
    pub fn raw(body: impl Into<Bytes>) -> Self {
        Self {
            raw: Some(body.into()),
            ..Self::default()
        }
    }

    /// Override the success status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a response header. Values that are not valid header text are dropped.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(hv) => {
                self.headers.insert(name, hv);
            }
            Err(_) => tracing::warn!(header = name, "dropping invalid response header value"),
        }
        self
    }
}

impl From<Params> for Output {
    fn from(params: Params) -> Self {
        Self::new(params)
    }
}
