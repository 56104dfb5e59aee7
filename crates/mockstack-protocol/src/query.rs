//! The `awsQuery` dialect.
//!
//! Requests are form-encoded (body or query string) with the operation in
//! the `Action` field. Repeated structures are flattened into indexed keys
//! which [`unflatten`] turns back into nested values:
//!
//! ```text
//! Tags.member.1.Key=env&Tags.member.1.Value=dev
//! Attributes.entry.1.key=DisplayName&Attributes.entry.1.value=Alerts
//! ```
//!
//! Responses are XML documents shaped as
//! `<OpResponse><OpResult>…</OpResult><ResponseMetadata><RequestId/></ResponseMetadata></OpResponse>`
//! and errors as `<ErrorResponse><Error><Type/><Code/><Message/></Error><RequestId/></ErrorResponse>`.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::StatusCode;
use http::request::Parts;
use quick_xml::events::BytesText;
use mockstack_core::{Params, Value};

use crate::call::{Call, Output};
use crate::codec::Codec;
use crate::error::{ErrorKind, ServiceError};
use crate::response::{AMZN_REQUEST_ID, build, merge_headers};
use crate::xml::{document, write_params};

const XML_CONTENT_TYPE: &str = "text/xml";

/// Intermediate tree of dotted form keys.
#[derive(Debug, Default)]
enum Node {
    #[default]
    Empty,
    Leaf(String),
    Branch(BTreeMap<String, Node>),
}

impl Node {
    fn insert(&mut self, path: &[&str], value: String) -> Result<(), String> {
        let Some((head, rest)) = path.split_first() else {
            return match self {
                Self::Empty => {
                    *self = Self::Leaf(value);
                    Ok(())
                }
                _ => Err("duplicate or conflicting parameter".to_owned()),
            };
        };
        if matches!(self, Self::Empty) {
            *self = Self::Branch(BTreeMap::new());
        }
        match self {
            Self::Branch(children) => children
                .entry((*head).to_owned())
                .or_default()
                .insert(rest, value),
            _ => Err(format!("parameter {head} conflicts with a scalar value")),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Leaf(s) => Value::String(s),
            Self::Branch(mut children) => {
                // `X.member.N` / `X.entry.N` wrap an indexed list.
                if children.len() == 1 {
                    for wrapper in ["member", "entry"] {
                        if let Some(inner) = children.remove(wrapper) {
                            if inner.is_indexed() {
                                return inner.into_value();
                            }
                            children.insert(wrapper.to_owned(), inner);
                        }
                    }
                }
                let node = Self::Branch(children);
                if node.is_indexed() {
                    return node.into_list();
                }
                match node {
                    Self::Branch(children) => Value::Map(
                        children
                            .into_iter()
                            .map(|(k, v)| (k, v.into_value()))
                            .collect(),
                    ),
                    other => other.into_value(),
                }
            }
        }
    }

    fn is_indexed(&self) -> bool {
        matches!(self, Self::Branch(children)
            if !children.is_empty() && children.keys().all(|k| k.parse::<u32>().is_ok()))
    }

    fn into_list(self) -> Value {
        let Self::Branch(children) = self else {
            return self.into_value();
        };
        let mut indexed: Vec<(u32, Node)> = children
            .into_iter()
            .filter_map(|(k, v)| k.parse().ok().map(|i| (i, v)))
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        Value::List(indexed.into_iter().map(|(_, v)| v.into_value()).collect())
    }
}

/// Turn flat `a.b.1.c=v` pairs into nested parameters.
///
/// # Errors
/// Returns a description of the offending key when two keys conflict.
pub fn unflatten<I, K, V>(pairs: I) -> Result<Params, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut root = Node::Empty;
    for (key, value) in pairs {
        let path: Vec<&str> = key.as_ref().split('.').collect();
        if path.iter().any(|segment| segment.is_empty()) {
            return Err(format!("invalid parameter name: {}", key.as_ref()));
        }
        root.insert(&path, value.into())?;
    }
    match root.into_value() {
        Value::Map(params) => Ok(params),
        Value::Null => Ok(Params::new()),
        _ => Err("parameters must be named".to_owned()),
    }
}

/// Codec for the query/XML dialect.
#[derive(Debug, Clone)]
pub struct AwsQueryCodec {
    namespace: &'static str,
}

impl AwsQueryCodec {
    /// Create a codec whose XML documents carry `xmlns="<namespace>"`.
    #[must_use]
    pub fn new(namespace: &'static str) -> Self {
        Self { namespace }
    }
}

impl Codec for AwsQueryCodec {
    fn protocol(&self) -> &'static str {
        "awsQuery"
    }

    fn decode(&self, parts: &Parts, body: Bytes) -> Result<Call, ServiceError> {
        let from_query = parts
            .uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()))
            .into_iter()
            .flatten();
        let pairs: Vec<(String, String)> = from_query
            .chain(form_urlencoded::parse(&body))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut params = unflatten(pairs)
            .map_err(|msg| ServiceError::decode("MalformedQueryString", msg))?;

        let operation = match params.remove("Action") {
            Some(Value::String(action)) if !action.is_empty() => action,
            _ => {
                return Err(ServiceError::new(
                    ErrorKind::UnsupportedOperation,
                    "MissingAction",
                    "missing Action parameter",
                ));
            }
        };
        params.remove("Version");

        Ok(Call {
            operation,
            params,
            body,
            headers: parts.headers.clone(),
        })
    }

    fn encode(
        &self,
        _parts: &Parts,
        operation: &str,
        output: Output,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let result_tag = format!("{operation}Result");
        let xml = document(&format!("{operation}Response"), Some(self.namespace), |w| {
            if !output.params.is_empty() {
                w.create_element(result_tag.as_str())
                    .write_inner_content(|w| write_params(w, &output.params))?;
            }
            w.create_element("ResponseMetadata").write_inner_content(|w| {
                w.create_element("RequestId")
                    .write_text_content(BytesText::new(request_id))?;
                Ok(())
            })?;
            Ok(())
        });
        let response = build(
            output.status.unwrap_or(StatusCode::OK),
            Some(XML_CONTENT_TYPE),
            Bytes::from(xml),
            AMZN_REQUEST_ID,
            request_id,
        );
        merge_headers(response, output.headers)
    }

    fn encode_error(
        &self,
        _parts: &Parts,
        error: &ServiceError,
        request_id: &str,
    ) -> http::Response<Bytes> {
        let fault = if error.is_client_fault() { "Sender" } else { "Receiver" };
        let xml = document("ErrorResponse", Some(self.namespace), |w| {
            w.create_element("Error").write_inner_content(|w| {
                w.create_element("Type")
                    .write_text_content(BytesText::new(fault))?;
                w.create_element("Code")
                    .write_text_content(BytesText::new(&error.code))?;
                w.create_element("Message")
                    .write_text_content(BytesText::new(&error.message))?;
                Ok(())
            })?;
            w.create_element("RequestId")
                .write_text_content(BytesText::new(request_id))?;
            Ok(())
        });
        build(
            error.status,
            Some(XML_CONTENT_TYPE),
            Bytes::from(xml),
            AMZN_REQUEST_ID,
            request_id,
        )
    }
}
