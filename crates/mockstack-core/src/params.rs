//! Dynamic request/response parameter bags.
//!
//! Every wire dialect (JSON, CBOR, form fields, XML) decodes into the same
//! [`Params`] map of [`Value`]s, and every service mock builds its response
//! as a [`Params`] that the codec then re-encodes. Typed accessors never
//! panic: absent values yield a default or [`ParamError::Missing`], values of
//! the wrong shape yield [`ParamError::InvalidType`].

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ParamError;

/// A loosely-typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Explicit null / absent.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Point in time; each codec renders it in its native timestamp format.
    Timestamp(DateTime<Utc>),
    /// Binary payload; base64 in text dialects, a byte string in CBOR.
    Blob(Vec<u8>),
    /// Ordered list.
    List(Vec<Value>),
    /// Nested mapping.
    Map(Params),
}

impl Value {
    /// Whether this value is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view. Accepts integral floats and numeric strings.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Floating point view. Accepts integers and numeric strings.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view. Accepts `"true"` / `"false"` strings.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Self::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// List view.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Mapping view.
    #[must_use]
    pub fn as_map(&self) -> Option<&Params> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Render a scalar as text, the way text dialects (query, XML) carry it.
    ///
    /// Returns `None` for null, lists and maps.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Timestamp(ts) => Some(format_iso8601(ts)),
            Self::Blob(bytes) => Some(BASE64.encode(bytes)),
            Self::Null | Self::List(_) | Self::Map(_) => None,
        }
    }
}

/// Format a timestamp as ISO 8601 with millisecond precision (`2024-01-02T03:04:05.000Z`).
#[must_use]
pub fn format_iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Self::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Self::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Params> for Value {
    fn from(map: Params) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// An ordered, string-keyed mapping of [`Value`]s.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert a value, replacing any previous one. Null values are not stored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        let key = key.into();
        if value.is_null() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
        self
    }

    /// Remove and return a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Raw lookup. Null values count as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Whether a non-null value is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Mutable access to a nested value, inserting `default` first if absent.
    pub fn entry_or_insert(&mut self, key: impl Into<String>, default: Value) -> &mut Value {
        self.0.entry(key.into()).or_insert(default)
    }

    /// Move every entry of `other` into `self`, keeping existing keys.
    pub fn merge_missing(&mut self, other: Params) {
        for (k, v) in other.0 {
            self.0.entry(k).or_insert(v);
        }
    }

    // -- Typed accessors --

    /// String value, if present and a string.
    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// String value or [`ParamError::Missing`].
    pub fn require_str(&self, key: &str) -> Result<&str, ParamError> {
        match self.get(key) {
            None => Err(ParamError::Missing(key.to_owned())),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(invalid(key, "string")),
        }
    }

    /// Optional integer.
    pub fn opt_i64(&self, key: &str) -> Result<Option<i64>, ParamError> {
        self.get(key)
            .map(|v| v.as_i64().ok_or_else(|| invalid(key, "integer")))
            .transpose()
    }

    /// Integer with a default.
    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, ParamError> {
        Ok(self.opt_i64(key)?.unwrap_or(default))
    }

    /// Required integer.
    pub fn require_i64(&self, key: &str) -> Result<i64, ParamError> {
        self.opt_i64(key)?
            .ok_or_else(|| ParamError::Missing(key.to_owned()))
    }

    /// Optional floating point number.
    pub fn f64(&self, key: &str) -> Result<Option<f64>, ParamError> {
        self.get(key)
            .map(|v| v.as_f64().ok_or_else(|| invalid(key, "number")))
            .transpose()
    }

    /// Boolean with a default.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ParamError> {
        self.get(key)
            .map_or(Ok(default), |v| v.as_bool().ok_or_else(|| invalid(key, "boolean")))
    }

    /// List value; an absent key yields an empty slice.
    pub fn list(&self, key: &str) -> Result<&[Value], ParamError> {
        match self.get(key) {
            None => Ok(&[]),
            Some(Value::List(items)) => Ok(items),
            Some(_) => Err(invalid(key, "list")),
        }
    }

    /// Nested mapping, if present.
    pub fn map(&self, key: &str) -> Result<Option<&Params>, ParamError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Map(map)) => Ok(Some(map)),
            Some(_) => Err(invalid(key, "structure")),
        }
    }

    /// List of strings; an absent key yields an empty list.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, ParamError> {
        self.list(key)?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| invalid(key, "list of strings"))
            })
            .collect()
    }

    /// String-to-string mapping.
    ///
    /// Accepts a nested mapping (`{"k": "v"}`) as well as a list of entries
    /// using any of the conventional key/value field pairs (`key`/`value`,
    /// `Key`/`Value`, `Name`/`Value`), which is how form-encoded and tag-list
    /// shaped inputs arrive.
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>, ParamError> {
        match self.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Value::Map(map)) => map
                .iter()
                .map(|(k, v)| {
                    v.to_text()
                        .map(|text| (k.clone(), text))
                        .ok_or_else(|| invalid(key, "map of strings"))
                })
                .collect(),
            Some(Value::List(entries)) => entries
                .iter()
                .map(|entry| {
                    let entry = entry.as_map().ok_or_else(|| invalid(key, "list of entries"))?;
                    let k = ["key", "Key", "Name"]
                        .iter()
                        .find_map(|field| entry.str(field))
                        .ok_or_else(|| invalid(key, "list of entries"))?;
                    let v = ["value", "Value"]
                        .iter()
                        .find_map(|field| entry.get(field).and_then(Value::to_text))
                        .unwrap_or_default();
                    Ok((k.to_owned(), v))
                })
                .collect(),
            Some(_) => Err(invalid(key, "map")),
        }
    }

    /// Binary value. Accepts raw blobs and base64-encoded strings.
    pub fn blob(&self, key: &str) -> Result<Option<Vec<u8>>, ParamError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Blob(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::String(s)) => BASE64
                .decode(s)
                .map(Some)
                .map_err(|_| invalid(key, "base64-encoded blob")),
            Some(_) => Err(invalid(key, "blob")),
        }
    }
}

fn invalid(name: &str, expected: &'static str) -> ParamError {
    ParamError::InvalidType {
        name: name.to_owned(),
        expected,
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

impl IntoIterator for Params {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<BTreeMap<String, String>> for Params {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_report_missing_required_string() {
        let params = Params::new();
        assert_eq!(
            params.require_str("QueueName"),
            Err(ParamError::Missing("QueueName".to_owned())),
        );
    }

    #[test]
    fn test_should_reject_wrong_type_without_panicking() {
        let params = Params::new().with("Limit", "ten");
        assert!(matches!(
            params.opt_i64("Limit"),
            Err(ParamError::InvalidType { .. })
        ));
        assert!(params.require_str("Limit").is_ok());
    }

    #[test]
    fn test_should_parse_numeric_strings_as_integers() {
        let params = Params::new().with("MaxNumberOfMessages", "3");
        assert_eq!(params.i64_or("MaxNumberOfMessages", 1).unwrap(), 3);
        assert_eq!(params.i64_or("Absent", 7).unwrap(), 7);
    }

    #[test]
    fn test_should_treat_null_as_absent() {
        let mut params = Params::new().with("Name", "a");
        params.set("Name", Value::Null);
        assert!(!params.contains("Name"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_should_read_string_map_from_entry_list() {
        let entries = vec![
            Value::Map(Params::new().with("key", "DisplayName").with("value", "Alerts")),
            Value::Map(Params::new().with("Key", "team").with("Value", "core")),
        ];
        let params = Params::new().with("Attributes", entries);
        let map = params.string_map("Attributes").unwrap();
        assert_eq!(map.get("DisplayName").map(String::as_str), Some("Alerts"));
        assert_eq!(map.get("team").map(String::as_str), Some("core"));
    }

    #[test]
    fn test_should_read_string_map_from_nested_map() {
        let inner = Params::new().with("VisibilityTimeout", 30_i64);
        let params = Params::new().with("Attributes", inner);
        let map = params.string_map("Attributes").unwrap();
        assert_eq!(map.get("VisibilityTimeout").map(String::as_str), Some("30"));
    }

    #[test]
    fn test_should_decode_base64_blob() {
        let params = Params::new().with("Data", "aGVsbG8=");
        assert_eq!(params.blob("Data").unwrap(), Some(b"hello".to_vec()));
        let params = Params::new().with("Data", Value::Blob(b"raw".to_vec()));
        assert_eq!(params.blob("Data").unwrap(), Some(b"raw".to_vec()));
    }

    #[test]
    fn test_should_read_bool_from_string() {
        let params = Params::new().with("Force", "true");
        assert!(params.bool_or("Force", false).unwrap());
        assert!(!params.bool_or("Other", false).unwrap());
    }
}
