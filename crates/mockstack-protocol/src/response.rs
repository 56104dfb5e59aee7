//! Response construction shared by every codec.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Request-id header used by the JSON and query dialects.
pub const AMZN_REQUEST_ID: HeaderName = HeaderName::from_static("x-amzn-requestid");

/// Request-id header used by the REST XML dialect.
pub const AMZ_REQUEST_ID: HeaderName = HeaderName::from_static("x-amz-request-id");

/// Build a response without going through the fallible builder.
#[must_use]
pub fn build(
    status: StatusCode,
    content_type: Option<&str>,
    body: Bytes,
    request_id_header: HeaderName,
    request_id: &str,
) -> http::Response<Bytes> {
    let len = body.len();
    let mut response = http::Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(ct) = content_type.and_then(|ct| HeaderValue::from_str(ct).ok()) {
        headers.insert(CONTENT_TYPE, ct);
    }
    if let Ok(hv) = HeaderValue::from_str(request_id) {
        headers.insert(request_id_header, hv);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    response
}

/// Add an `x-amz-crc32` checksum of the body, as the JSON dialects do.
#[must_use]
pub fn with_crc32(mut response: http::Response<Bytes>) -> http::Response<Bytes> {
    let crc = crc32fast::hash(response.body());
    response
        .headers_mut()
        .insert("x-amz-crc32", HeaderValue::from(crc));
    response
}

/// Copy operation-supplied headers onto a response, overriding defaults.
///
/// A header the operation sets several times keeps every value.
#[must_use]
pub fn merge_headers(mut response: http::Response<Bytes>, extra: HeaderMap) -> http::Response<Bytes> {
    let headers = response.headers_mut();
    let mut current: Option<HeaderName> = None;
    for (name, value) in extra {
        match name {
            Some(name) => {
                headers.insert(name.clone(), value);
                current = Some(name);
            }
            None => {
                if let Some(name) = &current {
                    headers.append(name.clone(), value);
                }
            }
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_set_common_headers() {
        let resp = build(
            StatusCode::OK,
            Some("application/json"),
            Bytes::from_static(b"{}"),
            AMZN_REQUEST_ID,
            "req-1",
        );
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(resp.headers().get("x-amzn-requestid").unwrap(), "req-1");
        assert_eq!(resp.headers().get(CONTENT_LENGTH).unwrap(), "2");
    }

    #[test]
    fn test_should_add_crc32() {
        let resp = with_crc32(build(
            StatusCode::OK,
            None,
            Bytes::from_static(b"{}"),
            AMZN_REQUEST_ID,
            "req-1",
        ));
        let expected = crc32fast::hash(b"{}").to_string();
        assert_eq!(resp.headers().get("x-amz-crc32").unwrap(), expected.as_str());
    }

    #[test]
    fn test_should_let_extra_headers_override() {
        let mut extra = HeaderMap::new();
        extra.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let resp = merge_headers(
            build(
                StatusCode::OK,
                Some("application/xml"),
                Bytes::new(),
                AMZ_REQUEST_ID,
                "r",
            ),
            extra,
        );
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn test_should_keep_every_value_of_repeated_header() {
        let name = HeaderName::from_static("x-amz-meta-tag");
        let mut extra = HeaderMap::new();
        extra.append(name.clone(), HeaderValue::from_static("a"));
        extra.append(name.clone(), HeaderValue::from_static("b"));
        let resp = merge_headers(
            build(StatusCode::OK, None, Bytes::new(), AMZ_REQUEST_ID, "r"),
            extra,
        );
        let values: Vec<_> = resp.headers().get_all(&name).iter().collect();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(resp.headers().get(AMZ_REQUEST_ID).unwrap(), "r");
    }
}
