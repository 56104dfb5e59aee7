//! Object storage over the `restXml` dialect.
//!
//! Buckets are the stored resource; objects live inside their bucket, so
//! a bucket can only be deleted once it is empty and nothing outlives it.
//! This is also the fallback service for requests that carry no other
//! routing signal.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use md5::{Digest, Md5};
use mockstack_core::{Params, Resource, ResourceScope, ResourceStore, Value};
use mockstack_protocol::{
    Call, ErrorCodes, ErrorKind, Output, Payload, ProtocolMock, Provider, RestXmlCodec, Route,
    RouteTable, ServiceError,
};
use tracing::info;

/// XML namespace of every S3 document.
pub const NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Default `max-keys` for listings.
const DEFAULT_MAX_KEYS: i64 = 1000;

/// Content type recorded when a `PutObject` carries none.
const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Prefix of user-defined metadata headers.
const META_PREFIX: &str = "x-amz-meta-";

/// Minimum bucket name length.
const MIN_BUCKET_NAME_LEN: usize = 3;

/// Maximum bucket name length.
const MAX_BUCKET_NAME_LEN: usize = 63;

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "InvalidArgument",
    not_found: "NoSuchBucket",
    already_exists: "BucketAlreadyOwnedByYou",
    lock_conflict: "OperationAborted",
    unknown_operation: "MethodNotAllowed",
    not_found_status: StatusCode::NOT_FOUND,
    conflict_status: StatusCode::CONFLICT,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A stored object.
#[derive(Debug, Clone)]
pub struct S3Object {
    /// Object payload.
    pub data: Bytes,
    /// Quoted MD5 hex digest of the payload.
    pub etag: String,
    /// `Content-Type` given at upload.
    pub content_type: String,
    /// Upload time.
    pub last_modified: DateTime<Utc>,
    /// User-defined metadata (without the `x-amz-meta-` prefix).
    pub metadata: BTreeMap<String, String>,
}

impl S3Object {
    fn new(data: Bytes, content_type: String, metadata: BTreeMap<String, String>) -> Self {
        let etag = format!("\"{}\"", hex::encode(Md5::digest(&data)));
        Self {
            data,
            etag,
            content_type,
            last_modified: Utc::now(),
            metadata,
        }
    }

    fn to_params(&self, key: &str) -> Params {
        Params::new()
            .with("Key", key)
            .with("LastModified", self.last_modified)
            .with("ETag", self.etag.as_str())
            .with("Size", self.data.len())
            .with("StorageClass", "STANDARD")
    }
}

/// A bucket and every object in it.
#[derive(Debug, Clone)]
pub struct Bucket {
    /// Bucket name; also its store id.
    pub name: String,
    /// Location constraint given at creation.
    pub region: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Objects keyed by object key.
    pub objects: BTreeMap<String, S3Object>,
}

impl Resource for Bucket {
    const KIND: &'static str = "Bucket";

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// One page of keys under a prefix, grouped by delimiter.
#[derive(Debug, Default)]
struct Listing {
    contents: Vec<Params>,
    common_prefixes: Vec<String>,
    truncated: bool,
    /// Last key or common prefix returned, when truncated.
    next_marker: Option<String>,
}

/// Walk `objects` in key order after `after`, keeping at most `max` entries
/// (objects and common prefixes both count).
fn list_keys(
    objects: &BTreeMap<String, S3Object>,
    prefix: &str,
    delimiter: Option<&str>,
    after: Option<&str>,
    max: usize,
) -> Listing {
    let mut listing = Listing::default();
    if max == 0 {
        return listing;
    }
    let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
    let mut last: Option<String> = None;
    let mut count = 0;

    for (key, object) in objects.range::<str, _>((lower, Bound::Unbounded)) {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let group = delimiter
            .filter(|d| !d.is_empty())
            .and_then(|d| rest.find(d).map(|i| &key[..prefix.len() + i + d.len()]));

        if let Some(common) = group {
            let seen = listing.common_prefixes.last().is_some_and(|p| p == common);
            let before_marker = after.is_some_and(|a| common <= a);
            if seen || before_marker {
                continue;
            }
            if count == max {
                listing.truncated = true;
                break;
            }
            listing.common_prefixes.push(common.to_owned());
            last = Some(common.to_owned());
        } else {
            if count == max {
                listing.truncated = true;
                break;
            }
            listing.contents.push(object.to_params(key));
            last = Some(key.clone());
        }
        count += 1;
    }

    if listing.truncated {
        listing.next_marker = last;
    }
    listing
}

/// Validate a bucket name against the S3 naming rules.
fn validate_bucket_name(name: &str) -> Result<(), ServiceError> {
    let invalid = |reason: &str| {
        ServiceError::new(
            ErrorKind::Validation,
            "InvalidBucketName",
            format!("The specified bucket is not valid: {reason}"),
        )
    };

    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&name.len()) {
        return Err(invalid(&format!(
            "bucket name must be between {MIN_BUCKET_NAME_LEN} and {MAX_BUCKET_NAME_LEN} characters long"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return Err(invalid(
            "bucket name must only contain lowercase letters, numbers, hyphens, and dots",
        ));
    }
    let edge_ok = |b: Option<&u8>| b.is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !edge_ok(name.as_bytes().first()) || !edge_ok(name.as_bytes().last()) {
        return Err(invalid("bucket name must start and end with a letter or number"));
    }
    if name.contains("..") {
        return Err(invalid("bucket name must not contain consecutive dots"));
    }
    Ok(())
}

fn no_such_key(key: &str) -> ServiceError {
    ServiceError::new(
        ErrorKind::NotFound,
        "NoSuchKey",
        format!("The specified key does not exist: {key}"),
    )
    .with_status(StatusCode::NOT_FOUND)
}

fn no_such_bucket(bucket: &str) -> ServiceError {
    ServiceError::new(
        ErrorKind::NotFound,
        "NoSuchBucket",
        format!("The specified bucket does not exist: {bucket}"),
    )
    .with_status(StatusCode::NOT_FOUND)
}

fn http_date(ts: &DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Headers describing an object, shared by `GetObject` and `HeadObject`.
fn object_headers(object: &S3Object) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut put = |name: HeaderName, value: &str| {
        if let Ok(hv) = HeaderValue::from_str(value) {
            headers.insert(name, hv);
        }
    };
    put(CONTENT_TYPE, &object.content_type);
    put(ETAG, &object.etag);
    put(LAST_MODIFIED, &http_date(&object.last_modified));
    put(CONTENT_LENGTH, &object.data.len().to_string());
    for (key, value) in &object.metadata {
        if let Ok(name) = HeaderName::from_bytes(format!("{META_PREFIX}{key}").as_bytes()) {
            put(name, value);
        }
    }
    headers
}

fn user_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            Some((key.to_owned(), value.to_str().ok()?.to_owned()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// The S3 provider.
#[derive(Debug)]
pub struct S3Provider {
    buckets: ResourceStore<Bucket>,
    scope: ResourceScope,
}

impl S3Provider {
    /// Create a provider with an empty bucket store.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            buckets: ResourceStore::new(),
            scope,
        }
    }

    fn require_bucket(&self, name: &str) -> Result<Bucket, ServiceError> {
        self.buckets
            .get(name)
            .map(|r| r.value)
            .ok_or_else(|| no_such_bucket(name))
    }

    /// Handle `ListBuckets`.
    fn handle_list_buckets(&self) -> Params {
        let buckets: Vec<Value> = self
            .buckets
            .list()
            .into_iter()
            .map(|r| {
                Params::new()
                    .with("Name", r.value.name.as_str())
                    .with("CreationDate", r.value.created)
                    .into()
            })
            .collect();
        let owner = Params::new()
            .with("ID", self.scope.account.as_str())
            .with("DisplayName", "mockstack");
        Params::new().with(
            "ListAllMyBucketsResult",
            Params::new()
                .with("Owner", owner)
                .with("Buckets", Params::new().with("Bucket", buckets)),
        )
    }

    /// Handle `CreateBucket`.
    fn handle_create_bucket(&self, params: &Params) -> Result<Output, ServiceError> {
        let name = params.require_str("Bucket")?;
        validate_bucket_name(name)?;
        let region = params
            .str("LocationConstraint")
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.scope.region.as_str())
            .to_owned();

        self.buckets.create(
            name,
            Bucket {
                name: name.to_owned(),
                region,
                created: Utc::now(),
                objects: BTreeMap::new(),
            },
        )?;
        info!(bucket = %name, "created bucket");
        Ok(Output::empty().with_header("location", format!("/{name}")))
    }

    /// Handle `HeadBucket`.
    fn handle_head_bucket(&self, params: &Params) -> Result<Output, ServiceError> {
        let bucket = self.require_bucket(params.require_str("Bucket")?)?;
        Ok(Output::empty().with_header("x-amz-bucket-region", &bucket.region))
    }

    /// Handle `GetBucketLocation`.
    fn handle_get_bucket_location(&self, params: &Params) -> Result<Params, ServiceError> {
        let bucket = self.require_bucket(params.require_str("Bucket")?)?;
        // us-east-1 is reported as an empty constraint.
        let constraint = (bucket.region != "us-east-1").then_some(bucket.region);
        Ok(Params::new().with("LocationConstraint", constraint))
    }

    /// Handle `DeleteBucket`.
    fn handle_delete_bucket(&self, params: &Params) -> Result<Output, ServiceError> {
        let name = params.require_str("Bucket")?;
        self.buckets
            .remove_if(name, None, |bucket| {
                if bucket.objects.is_empty() {
                    Ok(())
                } else {
                    Err(ServiceError::new(
                        ErrorKind::Conflict,
                        "BucketNotEmpty",
                        "The bucket you tried to delete is not empty",
                    )
                    .with_status(StatusCode::CONFLICT))
                }
            })
            .map_err(|e| match e.kind {
                ErrorKind::NotFound => no_such_bucket(name),
                _ => e,
            })?;
        info!(bucket = %name, "deleted bucket");
        Ok(Output::empty())
    }

    /// Handle `ListObjects` (v1, marker based).
    fn handle_list_objects(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("Bucket")?;
        let bucket = self.require_bucket(name)?;
        let prefix = params.str("prefix").unwrap_or("");
        let delimiter = params.str("delimiter");
        let marker = params.str("marker").filter(|m| !m.is_empty());
        let max_keys = params.i64_or("max-keys", DEFAULT_MAX_KEYS)?;

        let listing = list_keys(&bucket.objects, prefix, delimiter, marker, clamp_max_keys(max_keys));
        let mut result = Params::new()
            .with("Name", name)
            .with("Prefix", prefix)
            .with("Marker", marker.unwrap_or(""))
            .with("MaxKeys", max_keys)
            .with("Delimiter", delimiter)
            .with("IsTruncated", listing.truncated)
            .with("NextMarker", listing.next_marker.clone());
        append_entries(&mut result, listing);
        Ok(Params::new().with("ListBucketResult", result))
    }

    /// Handle `ListObjectsV2` (continuation-token based).
    fn handle_list_objects_v2(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("Bucket")?;
        let bucket = self.require_bucket(name)?;
        let prefix = params.str("prefix").unwrap_or("");
        let delimiter = params.str("delimiter");
        let max_keys = params.i64_or("max-keys", DEFAULT_MAX_KEYS)?;
        let continuation = params.str("continuation-token");
        let start_after = params.str("start-after").filter(|s| !s.is_empty());

        let after = match continuation {
            Some(token) => Some(decode_continuation(token)?),
            None => start_after.map(ToOwned::to_owned),
        };

        let listing = list_keys(
            &bucket.objects,
            prefix,
            delimiter,
            after.as_deref(),
            clamp_max_keys(max_keys),
        );
        let key_count = listing.contents.len() + listing.common_prefixes.len();
        let next_token = listing
            .next_marker
            .as_ref()
            .map(|marker| URL_SAFE_NO_PAD.encode(marker));

        let mut result = Params::new()
            .with("Name", name)
            .with("Prefix", prefix)
            .with("MaxKeys", max_keys)
            .with("KeyCount", key_count)
            .with("Delimiter", delimiter)
            .with("IsTruncated", listing.truncated)
            .with("ContinuationToken", continuation)
            .with("StartAfter", start_after)
            .with("NextContinuationToken", next_token);
        append_entries(&mut result, listing);
        Ok(Params::new().with("ListBucketResult", result))
    }

    /// Handle `PutObject`.
    fn handle_put_object(&self, call: &Call) -> Result<Output, ServiceError> {
        let bucket = call.params.require_str("Bucket")?;
        let key = call.params.require_str("Key")?;
        let content_type = call
            .header(CONTENT_TYPE.as_str())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_owned();
        let object = S3Object::new(call.body.clone(), content_type, user_metadata(&call.headers));
        let etag = object.etag.clone();

        self.buckets
            .update(bucket, None, |b: &mut Bucket| {
                b.objects.insert(key.to_owned(), object);
                Ok::<_, ServiceError>(())
            })
            .map_err(|_| no_such_bucket(bucket))?;
        tracing::debug!(bucket = %bucket, key = %key, size = call.body.len(), "stored object");
        Ok(Output::empty().with_header("etag", etag))
    }

    fn find_object(&self, params: &Params) -> Result<S3Object, ServiceError> {
        let bucket = self.require_bucket(params.require_str("Bucket")?)?;
        let key = params.require_str("Key")?;
        bucket
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| no_such_key(key))
    }

    /// Handle `GetObject`.
    fn handle_get_object(&self, params: &Params) -> Result<Output, ServiceError> {
        let object = self.find_object(params)?;
        let mut output = Output::raw(object.data.clone());
        output.headers = object_headers(&object);
        Ok(output)
    }

    /// Handle `HeadObject`.
    fn handle_head_object(&self, params: &Params) -> Result<Output, ServiceError> {
        let object = self.find_object(params)?;
        let mut output = Output::empty();
        output.headers = object_headers(&object);
        Ok(output)
    }

    /// Handle `DeleteObject`. Deleting an absent key succeeds.
    fn handle_delete_object(&self, params: &Params) -> Result<Output, ServiceError> {
        let bucket = params.require_str("Bucket")?;
        let key = params.require_str("Key")?;
        self.buckets
            .update(bucket, None, |b: &mut Bucket| {
                b.objects.remove(key);
                Ok::<_, ServiceError>(())
            })
            .map_err(|_| no_such_bucket(bucket))?;
        Ok(Output::empty())
    }
}

fn clamp_max_keys(max_keys: i64) -> usize {
    usize::try_from(max_keys.clamp(0, DEFAULT_MAX_KEYS)).unwrap_or(0)
}

fn decode_continuation(token: &str) -> Result<String, ServiceError> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| {
            ServiceError::new(
                ErrorKind::Validation,
                "InvalidArgument",
                "The continuation token provided is incorrect",
            )
        })
}

fn append_entries(result: &mut Params, listing: Listing) {
    let prefixes: Vec<Value> = listing
        .common_prefixes
        .into_iter()
        .map(|p| Params::new().with("Prefix", p).into())
        .collect();
    let contents: Vec<Value> = listing.contents.into_iter().map(Value::Map).collect();
    result.set("Contents", contents);
    result.set("CommonPrefixes", prefixes);
}

impl Provider for S3Provider {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        match call.operation.as_str() {
            "ListBuckets" => Ok(self.handle_list_buckets().into()),
            "CreateBucket" => self.handle_create_bucket(params),
            "HeadBucket" => self.handle_head_bucket(params),
            "GetBucketLocation" => self.handle_get_bucket_location(params).map(Into::into),
            "DeleteBucket" => self.handle_delete_bucket(params),
            "ListObjects" => self.handle_list_objects(params).map(Into::into),
            "ListObjectsV2" => self.handle_list_objects_v2(params).map(Into::into),
            "PutObject" => self.handle_put_object(&call),
            "GetObject" => self.handle_get_object(params),
            "HeadObject" => self.handle_head_object(params),
            "DeleteObject" => self.handle_delete_object(params),
            other => Err(ServiceError::unsupported_operation(other)),
        }
    }

    fn reset(&self) {
        self.buckets.reset();
    }
}

/// The S3 route table.
fn routes() -> RouteTable {
    RouteTable::new(vec![
        Route::new(Method::GET, "/", "ListBuckets"),
        Route::new(Method::GET, "/{Bucket}", "ListObjectsV2").with_query("list-type"),
        Route::new(Method::GET, "/{Bucket}", "GetBucketLocation").with_query("location"),
        Route::new(Method::GET, "/{Bucket}", "ListObjects"),
        Route::new(Method::PUT, "/{Bucket}", "CreateBucket").with_payload(Payload::Structure),
        Route::new(Method::HEAD, "/{Bucket}", "HeadBucket"),
        Route::new(Method::DELETE, "/{Bucket}", "DeleteBucket").with_status(StatusCode::NO_CONTENT),
        Route::new(Method::PUT, "/{Bucket}/{Key+}", "PutObject").with_payload(Payload::Raw),
        Route::new(Method::GET, "/{Bucket}/{Key+}", "GetObject"),
        Route::new(Method::HEAD, "/{Bucket}/{Key+}", "HeadObject"),
        Route::new(Method::DELETE, "/{Bucket}/{Key+}", "DeleteObject")
            .with_status(StatusCode::NO_CONTENT),
    ])
}

/// The S3 service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<S3Provider>> {
    Arc::new(ProtocolMock::new(
        S3Provider::new(scope.clone()),
        RestXmlCodec::new(routes(), NAMESPACE),
    ))
}
