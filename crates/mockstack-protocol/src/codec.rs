//! The codec contract every wire dialect implements.

use bytes::Bytes;
use http::request::Parts;

use crate::call::{Call, Output};
use crate::error::ServiceError;

/// How timestamps are rendered in a text dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Fractional seconds since the Unix epoch (awsJson).
    EpochSeconds,
    /// ISO 8601 with millisecond precision (XML, restJson).
    Iso8601,
}

/// Decodes requests into [`Call`]s and encodes [`Output`]s and
/// [`ServiceError`]s back into the dialect's envelopes.
///
/// Implementations never panic on malformed input: undecodable requests
/// become a [`ServiceError`] with [`ErrorKind::Decode`](crate::ErrorKind::Decode)
/// and unknown operations one with
/// [`ErrorKind::UnsupportedOperation`](crate::ErrorKind::UnsupportedOperation).
pub trait Codec: std::fmt::Debug + Send + Sync + 'static {
    /// Dialect name, e.g. `awsJson1_0`.
    fn protocol(&self) -> &'static str;

    /// Extract the operation name and parameters from a request.
    fn decode(&self, parts: &Parts, body: Bytes) -> Result<Call, ServiceError>;

    /// Encode a successful result.
    fn encode(
        &self,
        parts: &Parts,
        operation: &str,
        output: Output,
        request_id: &str,
    ) -> http::Response<Bytes>;

    /// Encode a failure in the dialect's native error envelope.
    fn encode_error(
        &self,
        parts: &Parts,
        error: &ServiceError,
        request_id: &str,
    ) -> http::Response<Bytes>;
}
