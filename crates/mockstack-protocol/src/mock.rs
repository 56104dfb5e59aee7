//! The service mock contract and the provider/codec adapter.

use std::fmt;

use bytes::Bytes;
use http::request::Parts;

use crate::call::{Call, Output};
use crate::codec::Codec;
use crate::error::{ErrorCodes, ServiceError};

/// A self-contained emulated service.
///
/// Implementations are interchangeable behind `Arc<dyn ServiceMock>`; the
/// registry only ever needs a name to route by, a handler and a reset.
pub trait ServiceMock: Send + Sync + 'static {
    /// Stable lowercase routing key, e.g. `"sqs"`.
    fn name(&self) -> &str;

    /// Handle one fully-buffered request.
    fn handle(&self, request: http::Request<Bytes>) -> http::Response<Bytes>;

    /// Discard all state. Idempotent.
    fn reset(&self);

    /// Render an error detected before the request reached [`handle`](Self::handle)
    /// (e.g. the body could not be read) in this service's native envelope.
    fn reject(&self, parts: &Parts, error: &ServiceError) -> http::Response<Bytes>;
}

/// Business logic of a service, independent of its wire dialect.
pub trait Provider: Send + Sync + 'static {
    /// Stable lowercase routing key.
    fn name(&self) -> &'static str;

    /// The service's error codes for generic failures.
    fn error_codes(&self) -> &'static ErrorCodes {
        &ErrorCodes::DEFAULT
    }

    /// Execute one decoded operation.
    fn dispatch(&self, call: Call) -> Result<Output, ServiceError>;

    /// Discard all state.
    fn reset(&self);
}

/// Binds a [`Provider`] to the [`Codec`] of its dialect, producing a
/// [`ServiceMock`].
pub struct ProtocolMock<P> {
    provider: P,
    codec: Box<dyn Codec>,
}

impl<P: Provider> fmt::Debug for ProtocolMock<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolMock")
            .field("service", &self.provider.name())
            .field("codec", &self.codec)
            .finish()
    }
}

impl<P: Provider> ProtocolMock<P> {
    /// Create a mock speaking `codec`.
    pub fn new(provider: P, codec: impl Codec) -> Self {
        Self {
            provider,
            codec: Box::new(codec),
        }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn fail(&self, parts: &Parts, error: ServiceError, request_id: &str) -> http::Response<Bytes> {
        let error = error.localize(self.provider.error_codes());
        tracing::debug!(
            service = self.provider.name(),
            code = %error.code,
            status = error.status.as_u16(),
            message = %error.message,
            "operation failed",
        );
        self.codec.encode_error(parts, &error, request_id)
    }
}

impl<P: Provider> ServiceMock for ProtocolMock<P> {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn handle(&self, request: http::Request<Bytes>) -> http::Response<Bytes> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (parts, body) = request.into_parts();

        let call = match self.codec.decode(&parts, body) {
            Ok(call) => call,
            Err(err) => return self.fail(&parts, err, &request_id),
        };

        let operation = call.operation.clone();
        tracing::debug!(
            service = self.provider.name(),
            protocol = self.codec.protocol(),
            operation = %operation,
            "dispatching operation",
        );

        match self.provider.dispatch(call) {
            Ok(output) => self.codec.encode(&parts, &operation, output, &request_id),
            Err(err) => self.fail(&parts, err, &request_id),
        }
    }

    fn reset(&self) {
        tracing::debug!(service = self.provider.name(), "resetting state");
        self.provider.reset();
    }

    fn reject(&self, parts: &Parts, error: &ServiceError) -> http::Response<Bytes> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.fail(parts, error.clone(), &request_id)
    }
}
