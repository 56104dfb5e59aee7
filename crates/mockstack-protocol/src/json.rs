//! JSON encoding and the `awsJson1_0` / `awsJson1_1` dialects.
//!
//! Both dialects are `POST /` with the operation in the `X-Amz-Target`
//! header:
//!
//! ```text
//! X-Amz-Target: DynamoDB_20120810.CreateTable
//! ```
//!
//! Some SDKs talk to awsJson 1.1 services in CBOR instead; a request sent
//! with `Content-Type: application/x-amz-cbor-1.1` is decoded as CBOR and
//! answered in CBOR.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use mockstack_core::{Params, Value, format_iso8601};
use serde_json::{Map, Number, Value as Json};

use crate::call::{Call, Output};
use crate::cbor;
use crate::codec::{Codec, TimestampFormat};
use crate::error::{ErrorKind, ServiceError};
use crate::response::{AMZN_REQUEST_ID, build, merge_headers, with_crc32};

/// CBOR variant content type accepted by awsJson 1.1 services.
pub const AMZ_CBOR_CONTENT_TYPE: &str = "application/x-amz-cbor-1.1";

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

/// Convert a parsed JSON document into a [`Value`].
#[must_use]
pub fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        Json::Object(map) => Value::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect()),
    }
}

/// Convert a [`Value`] into JSON, rendering timestamps with `format` and
/// blobs as base64.
#[must_use]
pub fn to_json(value: &Value, format: TimestampFormat) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::String(s) => Json::String(s.clone()),
        Value::Timestamp(ts) => match format {
            TimestampFormat::Iso8601 => Json::String(format_iso8601(ts)),
            TimestampFormat::EpochSeconds => {
                let millis = ts.timestamp_millis();
                if millis % 1000 == 0 {
                    Json::from(millis / 1000)
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    Number::from_f64(millis as f64 / 1000.0).map_or(Json::Null, Json::Number)
                }
            }
        },
        Value::Blob(b) => Json::String(BASE64.encode(b)),
        Value::List(items) => Json::Array(items.iter().map(|v| to_json(v, format)).collect()),
        Value::Map(map) => params_to_json(map, format),
    }
}

/// Convert a parameter bag into a JSON object.
#[must_use]
pub fn params_to_json(params: &Params, format: TimestampFormat) -> Json {
    let map: Map<String, Json> = params
        .iter()
        .map(|(k, v)| (k.clone(), to_json(v, format)))
        .collect();
    Json::Object(map)
}

/// Parse a JSON object body. An empty body parses as `{}`.
///
/// # Errors
/// A decode error carrying `code` if the body is not a JSON object.
pub fn parse_object(body: &[u8], code: &'static str) -> Result<Params, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Params::new());
    }
    let json: Json = serde_json::from_slice(body)
        .map_err(|e| ServiceError::decode(code, format!("could not parse request body: {e}")))?;
    match from_json(json) {
        Value::Map(params) => Ok(params),
        _ => Err(ServiceError::decode(code, "request body must be a JSON object")),
    }
}

// ---------------------------------------------------------------------------
// awsJson codec
// ---------------------------------------------------------------------------

/// awsJson protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonVersion {
    /// `application/x-amz-json-1.0`
    V1_0,
    /// `application/x-amz-json-1.1`
    V1_1,
}

impl JsonVersion {
    /// Content type for this version.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::V1_0 => "application/x-amz-json-1.0",
            Self::V1_1 => "application/x-amz-json-1.1",
        }
    }
}

/// Codec for the target-header JSON dialects.
#[derive(Debug, Clone)]
pub struct AwsJsonCodec {
    version: JsonVersion,
    target_prefix: &'static str,
    namespace: &'static str,
}

impl AwsJsonCodec {
    /// Create a codec accepting `X-Amz-Target: <target_prefix>.<Operation>`,
    /// qualifying error types with `namespace`.
    #[must_use]
    pub fn new(version: JsonVersion, target_prefix: &'static str, namespace: &'static str) -> Self {
        Self {
            version,
            target_prefix,
            namespace,
        }
    }

    /// Resolve the operation name from the `X-Amz-Target` header.
    fn resolve_operation<'a>(&self, headers: &'a http::HeaderMap) -> Result<&'a str, ServiceError> {
        let target = headers
            .get("x-amz-target")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorKind::UnsupportedOperation,
                    "MissingAction",
                    "missing X-Amz-Target header",
                )
            })?;

        target
            .split_once('.')
            .filter(|(prefix, op)| *prefix == self.target_prefix && !op.is_empty())
            .map(|(_, op)| op)
            .ok_or_else(|| ServiceError::unsupported_operation(target))
    }

    fn wants_cbor(parts: &Parts) -> bool {
        parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(AMZ_CBOR_CONTENT_TYPE))
    }

    fn respond(&self, parts: &Parts, status: StatusCode, params: &Params, request_id: &str) -> http::Response<Bytes> {
        if Self::wants_cbor(parts) {
            return build(
                status,
                Some(AMZ_CBOR_CONTENT_TYPE),
                Bytes::from(cbor::encode_map(params)),
                AMZN_REQUEST_ID,
                request_id,
            );
        }
        let json = params_to_json(params, TimestampFormat::EpochSeconds);
        let body = serde_json::to_vec(&json).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize JSON body");
            b"{}".to_vec()
        });
        with_crc32(build(
            status,
            Some(self.version.content_type()),
            Bytes::from(body),
            AMZN_REQUEST_ID,
            request_id,
        ))
    }
}

impl Codec for AwsJsonCodec {
    fn protocol(&self) -> &'static str {
        match self.version {
            JsonVersion::V1_0 => "awsJson1_0",
            JsonVersion::V1_1 => "awsJson1_1",
        }
    }

    fn decode(&self, parts: &Parts, body: Bytes) -> Result<Call, ServiceError> {
        if parts.method != http::Method::POST {
            return Err(ServiceError::validation(format!(
                "{} requires POST method, got {}",
                self.protocol(),
                parts.method,
            )));
        }

        let operation = self.resolve_operation(&parts.headers)?.to_owned();
        let params = if Self::wants_cbor(parts) {
            cbor::decode_map(&body)?
        } else {
            parse_object(&body, "SerializationException")?
        };

        Ok(Call {
            operation,
            params,
            body,
            headers: parts.headers.clone(),
        })
    }

    fn encode(
        &self,
        parts: &Parts,
        _operation: &str,
        output: Output,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let response = self.respond(
            parts,
            output.status.unwrap_or(StatusCode::OK),
            &output.params,
            request_id,
        );
        merge_headers(response, output.headers)
    }

    fn encode_error(
        &self,
        parts: &Parts,
        error: &ServiceError,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let body = Params::new()
            .with("__type", format!("{}#{}", self.namespace, error.code))
            .with("message", error.message.as_str());
        self.respond(parts, error.status, &body, request_id)
    }
}
