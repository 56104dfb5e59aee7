//! Path-routed REST dialects: `restJson1` and `restXml`.
//!
//! The operation is identified from the HTTP method, the URL path shape and
//! optionally the presence of a query key, using a [`RouteTable`]:
//!
//! ```text
//! GET    /{Bucket}?list-type   -> ListObjectsV2
//! PUT    /{Bucket}/{Key+}      -> PutObject
//! POST   /v2/apis              -> CreateApi (201)
//! DELETE /v2/apis/{apiId}      -> DeleteApi (204)
//! ```
//!
//! Path labels, query parameters and (for structured payloads) the body's
//! fields are merged into one [`Params`] bag; path labels take precedence.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::{HeaderValue, Method, StatusCode};
use mockstack_core::Params;
use percent_encoding::percent_decode_str;
use quick_xml::events::BytesText;

use crate::call::{Call, Output};
use crate::codec::{Codec, TimestampFormat};
use crate::error::{ErrorKind, ServiceError};
use crate::json::{params_to_json, parse_object};
use crate::response::{AMZ_REQUEST_ID, AMZN_REQUEST_ID, build, merge_headers};
use crate::xml::{document, parse_document, write_content};

/// How an operation's request body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Payload {
    /// The body is ignored.
    #[default]
    None,
    /// The body is an opaque blob left in [`Call::body`].
    Raw,
    /// The body is a JSON object or XML document merged into the params.
    Structure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Label(String),
    Greedy(String),
}

/// One entry of a [`RouteTable`].
#[derive(Debug, Clone)]
pub struct Route {
    method: Method,
    segments: Vec<Segment>,
    query: Option<&'static str>,
    operation: &'static str,
    payload: Payload,
    status: StatusCode,
}

impl Route {
    /// A route for `method` on `pattern`, e.g. `/v2/apis/{apiId}` or
    /// `/{Bucket}/{Key+}` (a trailing `+` label captures the rest of the path).
    #[must_use]
    pub fn new(method: Method, pattern: &str, operation: &'static str) -> Self {
        let segments = split_path(pattern)
            .into_iter()
            .map(|seg| match seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(label) => match label.strip_suffix('+') {
                    Some(greedy) => Segment::Greedy(greedy.to_owned()),
                    None => Segment::Label(label.to_owned()),
                },
                None => Segment::Literal(seg.to_owned()),
            })
            .collect();
        Self {
            method,
            segments,
            query: None,
            operation,
            payload: Payload::None,
            status: StatusCode::OK,
        }
    }

    /// Only match when the query string carries `key`.
    #[must_use]
    pub fn with_query(mut self, key: &'static str) -> Self {
        self.query = Some(key);
        self
    }

    /// Set how the body is interpreted.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Default success status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Operation name.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Match the path, returning the captured labels.
    fn match_path(&self, path: &[&str]) -> Option<Vec<(String, String)>> {
        let greedy = matches!(self.segments.last(), Some(Segment::Greedy(_)));
        let path = match path.split_last() {
            Some((&"", rest)) if !greedy => rest,
            _ => path,
        };

        let mut labels = Vec::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if path.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Label(name) => {
                    let raw = path.get(i).filter(|s| !s.is_empty())?;
                    labels.push((name.clone(), decode_component(raw)));
                }
                Segment::Greedy(name) => {
                    let rest = path.get(i..).map(|r| r.join("/")).unwrap_or_default();
                    if rest.is_empty() {
                        return None;
                    }
                    labels.push((name.clone(), decode_component(&rest)));
                    return Some(labels);
                }
            }
        }
        (path.len() == self.segments.len()).then_some(labels)
    }
}

/// Outcome of resolving a request against a [`RouteTable`].
#[derive(Debug)]
pub enum RouteMatch<'a> {
    /// A route matched; labels are the captured path parameters.
    Found(&'a Route, Vec<(String, String)>),
    /// The path exists but not for this method.
    MethodNotAllowed,
    /// No route has this path.
    NotFound,
}

/// Ordered list of routes; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Create a table. Routes requiring a query key should precede the
    /// general route for the same method and path.
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Resolve a method, path and query string.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str, query: &[(String, String)]) -> RouteMatch<'_> {
        let segments = split_path(path);
        let mut path_known = false;
        for route in &self.routes {
            let Some(labels) = route.match_path(&segments) else {
                continue;
            };
            path_known = true;
            let query_ok = route
                .query
                .is_none_or(|key| query.iter().any(|(k, _)| k == key));
            if route.method == *method && query_ok {
                return RouteMatch::Found(route, labels);
            }
        }
        if path_known {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    /// Default success status for an operation.
    #[must_use]
    pub fn status_for(&self, operation: &str) -> StatusCode {
        self.routes
            .iter()
            .find(|r| r.operation == operation)
            .map_or(StatusCode::OK, |r| r.status)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Parse a query string into decoded key-value pairs.
#[must_use]
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

/// Shared decode pipeline: route, then merge body, query and labels.
fn decode_rest(
    table: &RouteTable,
    parts: &Parts,
    body: Bytes,
    not_routable: impl Fn(RouteMatch<'_>) -> ServiceError,
    parse_body: impl Fn(&[u8]) -> Result<Params, ServiceError>,
) -> Result<Call, ServiceError> {
    let query = parse_query(parts.uri.query().unwrap_or(""));
    let (route, labels) = match table.resolve(&parts.method, parts.uri.path(), &query) {
        RouteMatch::Found(route, labels) => (route, labels),
        other => return Err(not_routable(other)),
    };

    let mut params = match route.payload {
        Payload::Structure if !body.is_empty() => parse_body(&body)?,
        _ => Params::new(),
    };
    for (k, v) in query {
        params.set(k, v);
    }
    for (k, v) in labels {
        params.set(k, v);
    }

    Ok(Call {
        operation: route.operation.to_owned(),
        params,
        body,
        headers: parts.headers.clone(),
    })
}

// ---------------------------------------------------------------------------
// restJson1
// ---------------------------------------------------------------------------

/// Codec for path-routed JSON APIs.
#[derive(Debug, Clone)]
pub struct RestJsonCodec {
    routes: RouteTable,
}

impl RestJsonCodec {
    /// Create a codec over a route table.
    #[must_use]
    pub fn new(routes: RouteTable) -> Self {
        Self { routes }
    }
}

impl Codec for RestJsonCodec {
    fn protocol(&self) -> &'static str {
        "restJson1"
    }

    fn decode(&self, parts: &Parts, body: Bytes) -> Result<Call, ServiceError> {
        decode_rest(
            &self.routes,
            parts,
            body,
            |outcome| match outcome {
                RouteMatch::MethodNotAllowed => ServiceError::new(
                    ErrorKind::UnsupportedOperation,
                    "MethodNotAllowedException",
                    format!("{} is not allowed on {}", parts.method, parts.uri.path()),
                )
                .with_status(StatusCode::METHOD_NOT_ALLOWED),
                _ => ServiceError::new(
                    ErrorKind::UnsupportedOperation,
                    "UnknownOperationException",
                    format!("no operation matches {} {}", parts.method, parts.uri.path()),
                )
                .with_status(StatusCode::NOT_FOUND),
            },
            |raw| parse_object(raw, "BadRequestException"),
        )
    }

    fn encode(
        &self,
        _parts: &Parts,
        operation: &str,
        output: Output,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let status = output
            .status
            .unwrap_or_else(|| self.routes.status_for(operation));
        let response = match output.raw {
            Some(raw) => build(status, None, raw, AMZN_REQUEST_ID, request_id),
            None if status == StatusCode::NO_CONTENT => {
                build(status, None, Bytes::new(), AMZN_REQUEST_ID, request_id)
            }
            None => {
                let json = params_to_json(&output.params, TimestampFormat::Iso8601);
                let body = serde_json::to_vec(&json).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "failed to serialize JSON body");
                    b"{}".to_vec()
                });
                build(
                    status,
                    Some("application/json"),
                    Bytes::from(body),
                    AMZN_REQUEST_ID,
                    request_id,
                )
            }
        };
        merge_headers(response, output.headers)
    }

    fn encode_error(
        &self,
        _parts: &Parts,
        error: &ServiceError,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let body = serde_json::to_vec(&serde_json::json!({ "message": error.message }))
            .unwrap_or_default();
        let mut response = build(
            error.status,
            Some("application/json"),
            Bytes::from(body),
            AMZN_REQUEST_ID,
            request_id,
        );
        if let Ok(hv) = HeaderValue::from_str(&error.code) {
            response.headers_mut().insert("x-amzn-errortype", hv);
        }
        response
    }
}

// ---------------------------------------------------------------------------
// restXml
// ---------------------------------------------------------------------------

/// Codec for path-routed XML APIs.
#[derive(Debug, Clone)]
pub struct RestXmlCodec {
    routes: RouteTable,
    namespace: &'static str,
}

impl RestXmlCodec {
    /// Create a codec over a route table; documents carry `xmlns="<namespace>"`.
    #[must_use]
    pub fn new(routes: RouteTable, namespace: &'static str) -> Self {
        Self { routes, namespace }
    }

    fn respond(&self, status: StatusCode, content_type: Option<&str>, body: Bytes, request_id: &str) -> http::Response<Bytes> {
        let mut response = build(status, content_type, body, AMZ_REQUEST_ID, request_id);
        if let Ok(hv) = HeaderValue::from_str(request_id) {
            response.headers_mut().insert("x-amz-id-2", hv);
        }
        response
    }
}

impl Codec for RestXmlCodec {
    fn protocol(&self) -> &'static str {
        "restXml"
    }

    fn decode(&self, parts: &Parts, body: Bytes) -> Result<Call, ServiceError> {
        decode_rest(
            &self.routes,
            parts,
            body,
            |_| {
                ServiceError::new(
                    ErrorKind::UnsupportedOperation,
                    "MethodNotAllowed",
                    "The specified method is not allowed against this resource.",
                )
                .with_status(StatusCode::METHOD_NOT_ALLOWED)
            },
            |raw| {
                parse_document(raw).map(|(_, content)| content).map_err(|e| {
                    ServiceError::decode(
                        "MalformedXML",
                        format!("The XML you provided was not well-formed: {e}"),
                    )
                })
            },
        )
    }

    fn encode(
        &self,
        _parts: &Parts,
        operation: &str,
        output: Output,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let status = output
            .status
            .unwrap_or_else(|| self.routes.status_for(operation));
        let response = if let Some(raw) = output.raw {
            self.respond(status, None, raw, request_id)
        } else if let Some((root, value)) = output.params.iter().next() {
            let xml = document(root, Some(self.namespace), |w| write_content(w, value));
            self.respond(status, Some("application/xml"), Bytes::from(xml), request_id)
        } else {
            self.respond(status, None, Bytes::new(), request_id)
        };
        merge_headers(response, output.headers)
    }

    fn encode_error(
        &self,
        parts: &Parts,
        error: &ServiceError,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let resource = parts.uri.path();
        let xml = document("Error", None, |w| {
            w.create_element("Code")
                .write_text_content(BytesText::new(&error.code))?;
            w.create_element("Message")
                .write_text_content(BytesText::new(&error.message))?;
            w.create_element("Resource")
                .write_text_content(BytesText::new(resource))?;
            w.create_element("RequestId")
                .write_text_content(BytesText::new(request_id))?;
            Ok(())
        });
        let mut response = self.respond(error.status, Some("application/xml"), Bytes::from(xml), request_id);
        if parts.method == Method::HEAD {
            *response.body_mut() = Bytes::new();
            response.headers_mut().remove(CONTENT_TYPE);
        }
        response
    }
}
