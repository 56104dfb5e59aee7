//! CBOR encoding and the Smithy `rpcv2Cbor` dialect.
//!
//! Requests are `POST /service/<Service>/operation/<Operation>` with a CBOR
//! map body. Responses and errors are CBOR maps; every response carries the
//! `smithy-protocol: rpc-v2-cbor` marker header.

use bytes::Bytes;
use chrono::DateTime;
use ciborium::value::{Integer, Value as Cbor};
use http::request::Parts;
use http::{HeaderValue, StatusCode};
use mockstack_core::{Params, Value};

use crate::call::{Call, Output};
use crate::codec::Codec;
use crate::error::ServiceError;
use crate::response::{AMZN_REQUEST_ID, build, merge_headers};

/// Content type of Smithy RPC v2 CBOR bodies.
pub const CBOR_CONTENT_TYPE: &str = "application/cbor";

/// Marker header required on every rpcv2Cbor response.
pub const SMITHY_PROTOCOL_HEADER: &str = "smithy-protocol";

/// CBOR tag for epoch-based date/time.
const EPOCH_TAG: u64 = 1;

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

/// Decode a CBOR map body. An empty body decodes to an empty map.
///
/// # Errors
/// A `SerializationException` if the body is not a CBOR map.
pub fn decode_map(body: &[u8]) -> Result<Params, ServiceError> {
    if body.is_empty() {
        return Ok(Params::new());
    }
    let value: Cbor = ciborium::from_reader(body)
        .map_err(|e| ServiceError::decode("SerializationException", format!("invalid CBOR body: {e}")))?;
    match from_cbor(value) {
        Value::Map(params) => Ok(params),
        _ => Err(ServiceError::decode(
            "SerializationException",
            "request body must be a CBOR map",
        )),
    }
}

/// Encode a parameter bag as a CBOR map.
#[must_use]
pub fn encode_map(params: &Params) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    if let Err(e) = ciborium::into_writer(&map_to_cbor(params), &mut buf) {
        tracing::error!(error = %e, "failed to serialize CBOR body");
        buf.clear();
    }
    buf
}

fn from_cbor(value: Cbor) -> Value {
    match value {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => {
            let wide = i128::from(i);
            #[allow(clippy::cast_precision_loss)]
            i64::try_from(wide).map_or(Value::Float(wide as f64), Value::Int)
        }
        Cbor::Float(f) => Value::Float(f),
        Cbor::Text(s) => Value::String(s),
        Cbor::Bytes(b) => Value::Blob(b),
        Cbor::Array(items) => Value::List(items.into_iter().map(from_cbor).collect()),
        Cbor::Map(entries) => Value::Map(
            entries
                .into_iter()
                .filter_map(|(k, v)| match k {
                    Cbor::Text(k) => Some((k, from_cbor(v))),
                    _ => None,
                })
                .collect(),
        ),
        Cbor::Tag(EPOCH_TAG, inner) => {
            let inner = from_cbor(*inner);
            #[allow(clippy::cast_possible_truncation)]
            inner
                .as_f64()
                .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0).round() as i64))
                .map_or(inner, Value::Timestamp)
        }
        Cbor::Tag(_, inner) => from_cbor(*inner),
        _ => Value::Null,
    }
}

fn map_to_cbor(params: &Params) -> Cbor {
    Cbor::Map(
        params
            .iter()
            .map(|(k, v)| (Cbor::Text(k.clone()), to_cbor(v)))
            .collect(),
    )
}

fn to_cbor(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Int(i) => Cbor::Integer(Integer::from(*i)),
        Value::Float(f) => Cbor::Float(*f),
        Value::String(s) => Cbor::Text(s.clone()),
        #[allow(clippy::cast_precision_loss)]
        Value::Timestamp(ts) => Cbor::Tag(
            EPOCH_TAG,
            Box::new(Cbor::Float(ts.timestamp_millis() as f64 / 1000.0)),
        ),
        Value::Blob(b) => Cbor::Bytes(b.clone()),
        Value::List(items) => Cbor::Array(items.iter().map(to_cbor).collect()),
        Value::Map(map) => map_to_cbor(map),
    }
}

/// CBOR error body: `{"__type": "<namespace>#<Code>", "message": ...}`.
#[must_use]
pub fn error_body(namespace: &str, error: &ServiceError) -> Vec<u8> {
    encode_map(
        &Params::new()
            .with("__type", format!("{namespace}#{}", error.code))
            .with("message", error.message.as_str()),
    )
}

// ---------------------------------------------------------------------------
// rpcv2Cbor codec
// ---------------------------------------------------------------------------

/// Codec for the Smithy RPC v2 CBOR dialect.
#[derive(Debug, Clone)]
pub struct RpcV2CborCodec {
    namespace: &'static str,
}

impl RpcV2CborCodec {
    /// Create a codec whose errors are qualified with `namespace`.
    #[must_use]
    pub fn new(namespace: &'static str) -> Self {
        Self { namespace }
    }

    fn respond(&self, status: StatusCode, body: Vec<u8>, request_id: &str) -> http::Response<Bytes> {
        let mut response = build(
            status,
            Some(CBOR_CONTENT_TYPE),
            Bytes::from(body),
            AMZN_REQUEST_ID,
            request_id,
        );
        response.headers_mut().insert(
            SMITHY_PROTOCOL_HEADER,
            HeaderValue::from_static("rpc-v2-cbor"),
        );
        response
    }
}

/// Split `/…/service/<Service>/operation/<Operation>` into its two names.
fn parse_rpc_path(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind("/service/")?;
    let rest = &path[idx + "/service/".len()..];
    let (service, operation) = rest.split_once("/operation/")?;
    (!service.is_empty() && !operation.is_empty() && !operation.contains('/'))
        .then_some((service, operation))
}

impl Codec for RpcV2CborCodec {
    fn protocol(&self) -> &'static str {
        "rpcv2Cbor"
    }

    fn decode(&self, parts: &Parts, body: Bytes) -> Result<Call, ServiceError> {
        let path = parts.uri.path();
        let (_, operation) = parse_rpc_path(path)
            .filter(|_| parts.method == http::Method::POST)
            .ok_or_else(|| ServiceError::unsupported_operation(path))?;
        let params = decode_map(&body)?;
        Ok(Call {
            operation: operation.to_owned(),
            params,
            body,
            headers: parts.headers.clone(),
        })
    }

    fn encode(
        &self,
        _parts: &Parts,
        _operation: &str,
        output: Output,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let body = output
            .raw
            .map_or_else(|| encode_map(&output.params), |raw| raw.to_vec());
        let response = self.respond(output.status.unwrap_or(StatusCode::OK), body, request_id);
        merge_headers(response, output.headers)
    }

    fn encode_error(
        &self,
        _parts: &Parts,
        error: &ServiceError,
        request_id: &str,
    ) -> http::Response<Bytes> {
        self.respond(error.status, error_body(self.namespace, error), request_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn parts(method: http::Method, path: &str) -> Parts {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_should_preserve_types_through_cbor() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let params = Params::new()
            .with("AlarmName", "cpu-high")
            .with("Threshold", 80.5)
            .with("EvaluationPeriods", 3_i64)
            .with("Updated", ts)
            .with("Payload", Value::Blob(vec![1, 2, 3]));
        let decoded = decode_map(&encode_map(&params)).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_should_treat_empty_body_as_empty_map() {
        assert!(decode_map(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_should_reject_non_map_body() {
        let mut buf = Vec::new();
        ciborium::into_writer(&Cbor::Text("nope".to_owned()), &mut buf).unwrap();
        let err = decode_map(&buf).unwrap_err();
        assert_eq!(err.code, "SerializationException");
    }

    #[test]
    fn test_should_reject_garbage_body() {
        let err = decode_map(&[0xff, 0x00, 0x13]).unwrap_err();
        assert_eq!(err.code, "SerializationException");
    }

    #[test]
    fn test_should_extract_operation_from_path() {
        let codec = RpcV2CborCodec::new("com.amazonaws.cloudwatch");
        let p = parts(
            http::Method::POST,
            "/service/GraniteServiceVersion20100801/operation/DescribeAlarms",
        );
        let call = codec.decode(&p, Bytes::new()).unwrap();
        assert_eq!(call.operation, "DescribeAlarms");
    }

    #[test]
    fn test_should_reject_malformed_path() {
        let codec = RpcV2CborCodec::new("ns");
        let p = parts(http::Method::POST, "/service/Granite");
        let err = codec.decode(&p, Bytes::new()).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_should_mark_responses_with_protocol_header() {
        let codec = RpcV2CborCodec::new("ns");
        let p = parts(http::Method::POST, "/service/S/operation/Op");
        let resp = codec.encode(&p, "Op", Output::empty(), "rid");
        assert_eq!(resp.headers().get("smithy-protocol").unwrap(), "rpc-v2-cbor");
        assert_eq!(resp.headers().get("content-type").unwrap(), CBOR_CONTENT_TYPE);

        let err = ServiceError::not_found("no alarm");
        let resp = codec.encode_error(&p, &err, "rid");
        let body = decode_map(resp.body()).unwrap();
        assert_eq!(body.str("__type"), Some("ns#ResourceNotFoundException"));
        assert_eq!(body.str("message"), Some("no alarm"));
    }
}
