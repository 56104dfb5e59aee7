//! Data streams over `awsJson1.1` (`Kinesis_20131202.<Operation>`).
//!
//! Requests with `Content-Type: application/x-amz-cbor-1.1` are served in
//! CBOR by the codec; the provider never sees the difference. Records are
//! routed to shards by the MD5 of their partition key and stored in the
//! stream record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use mockstack_core::{Params, Resource, ResourceScope, ResourceStore, Value};
use mockstack_protocol::{
    AwsJsonCodec, Call, ErrorCodes, JsonVersion, Output, ProtocolMock, Provider, ServiceError,
};
use tracing::info;

/// `X-Amz-Target` prefix.
pub const TARGET_PREFIX: &str = "Kinesis_20131202";

/// Error type namespace.
pub const NAMESPACE: &str = "com.amazonaws.kinesis";

const DEFAULT_SHARD_COUNT: i64 = 1;
const MAX_SHARD_COUNT: i64 = 500;
const MAX_RECORD_SIZE: usize = 1024 * 1024;
const MAX_PARTITION_KEY_LEN: usize = 256;
const DEFAULT_RETENTION_HOURS: i64 = 24;
const DEFAULT_LIST_LIMIT: i64 = 100;

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "InvalidArgumentException",
    already_exists: "ResourceInUseException",
    ..ErrorCodes::DEFAULT
};

/// A record stored in a shard.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Sequence number (zero-padded decimal, ordered per stream).
    pub sequence_number: String,
    /// Partition key used for shard routing.
    pub partition_key: String,
    /// Payload.
    pub data: Vec<u8>,
    /// Arrival time.
    pub arrived_at: DateTime<Utc>,
}

/// One shard and the records routed to it.
#[derive(Debug, Clone)]
pub struct Shard {
    /// Shard id, e.g. `shardId-000000000000`.
    pub id: String,
    /// First hash key owned by the shard.
    pub starting_hash_key: u128,
    /// Last hash key owned by the shard.
    pub ending_hash_key: u128,
    /// Records in arrival order.
    pub records: Vec<StreamRecord>,
}

/// A stream and its shards.
#[derive(Debug, Clone)]
pub struct Stream {
    /// Stream name; also its store id.
    pub name: String,
    /// Stream ARN.
    pub arn: String,
    /// Shards covering the whole hash key space.
    pub shards: Vec<Shard>,
    /// Retention period.
    pub retention_hours: i64,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last sequence number handed out.
    pub last_sequence: u64,
}

impl Resource for Stream {
    const KIND: &'static str = "Stream";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Split the 128-bit hash key space evenly across `count` shards.
fn split_shards(count: u32) -> Vec<Shard> {
    let width = u128::MAX / u128::from(count);
    (0..count)
        .map(|i| {
            let start = width * u128::from(i);
            let end = if i + 1 == count {
                u128::MAX
            } else {
                start + width - 1
            };
            Shard {
                id: format!("shardId-{i:012}"),
                starting_hash_key: start,
                ending_hash_key: end,
                records: Vec::new(),
            }
        })
        .collect()
}

fn hash_key(partition_key: &str) -> u128 {
    let digest = Md5::digest(partition_key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    u128::from_be_bytes(bytes)
}

fn format_sequence(seq: u64) -> String {
    format!("{seq:056}")
}

impl Stream {
    fn status(&self) -> &'static str {
        "ACTIVE"
    }

    fn shard_params(&self) -> Vec<Value> {
        self.shards
            .iter()
            .map(|s| {
                Params::new()
                    .with("ShardId", s.id.as_str())
                    .with(
                        "HashKeyRange",
                        Params::new()
                            .with("StartingHashKey", s.starting_hash_key.to_string())
                            .with("EndingHashKey", s.ending_hash_key.to_string()),
                    )
                    .with(
                        "SequenceNumberRange",
                        Params::new().with("StartingSequenceNumber", format_sequence(0)),
                    )
                    .into()
            })
            .collect()
    }

    fn common_description(&self) -> Params {
        Params::new()
            .with("StreamName", self.name.as_str())
            .with("StreamARN", self.arn.as_str())
            .with("StreamStatus", self.status())
            .with("RetentionPeriodHours", self.retention_hours)
            .with("StreamCreationTimestamp", self.created)
            .with("EncryptionType", "NONE")
            .with(
                "StreamModeDetails",
                Params::new().with("StreamMode", "PROVISIONED"),
            )
    }
}

/// The Kinesis provider.
#[derive(Debug)]
pub struct KinesisProvider {
    streams: ResourceStore<Stream>,
    scope: ResourceScope,
}

impl KinesisProvider {
    /// Create a provider with no streams.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            streams: ResourceStore::new(),
            scope,
        }
    }

    /// Stream name from `StreamName` or the last segment of `StreamARN`.
    fn stream_name(params: &Params) -> Result<&str, ServiceError> {
        if let Some(name) = params.str("StreamName") {
            return Ok(name);
        }
        params
            .str("StreamARN")
            .and_then(|arn| arn.rsplit_once('/').map(|(_, name)| name))
            .ok_or_else(|| ServiceError::missing_parameter("StreamName"))
    }

    /// Handle `CreateStream`.
    fn handle_create_stream(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("StreamName")?;
        let shard_count = params.i64_or("ShardCount", DEFAULT_SHARD_COUNT)?;
        if !(1..=MAX_SHARD_COUNT).contains(&shard_count) {
            return Err(ServiceError::validation(format!(
                "ShardCount must be between 1 and {MAX_SHARD_COUNT}, got {shard_count}"
            )));
        }
        let shard_count = u32::try_from(shard_count).unwrap_or(1);

        self.streams.create(
            name,
            Stream {
                name: name.to_owned(),
                arn: self.scope.arn("kinesis", &format!("stream/{name}")),
                shards: split_shards(shard_count),
                retention_hours: DEFAULT_RETENTION_HOURS,
                created: Utc::now(),
                last_sequence: 0,
            },
        )?;
        info!(stream = %name, shards = shard_count, "created stream");
        Ok(Params::new())
    }

    /// Handle `DescribeStream`.
    fn handle_describe_stream(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::stream_name(params)?;
        let description = self.streams.inspect(name, |r| {
            r.value
                .common_description()
                .with("Shards", r.value.shard_params())
                .with("HasMoreShards", false)
        })?;
        Ok(Params::new().with("StreamDescription", description))
    }

    /// Handle `DescribeStreamSummary`.
    fn handle_describe_stream_summary(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::stream_name(params)?;
        let summary = self.streams.inspect(name, |r| {
            r.value
                .common_description()
                .with("OpenShardCount", r.value.shards.len())
                .with("ConsumerCount", 0)
        })?;
        Ok(Params::new().with("StreamDescriptionSummary", summary))
    }

    /// Handle `ListStreams`.
    fn handle_list_streams(&self, params: &Params) -> Result<Params, ServiceError> {
        let limit = usize::try_from(params.i64_or("Limit", DEFAULT_LIST_LIMIT)?.max(1)).unwrap_or(1);
        let start = params.str("ExclusiveStartStreamName");
        let mut streams: Vec<Stream> = self
            .streams
            .list()
            .into_iter()
            .map(|r| r.value)
            .filter(|s| start.is_none_or(|start| s.name.as_str() > start))
            .collect();
        let has_more = streams.len() > limit;
        streams.truncate(limit);

        let names: Vec<&str> = streams.iter().map(|s| s.name.as_str()).collect();
        let summaries: Vec<Value> = streams
            .iter()
            .map(|s| {
                Params::new()
                    .with("StreamName", s.name.as_str())
                    .with("StreamARN", s.arn.as_str())
                    .with("StreamStatus", s.status())
                    .with("StreamCreationTimestamp", s.created)
                    .into()
            })
            .collect();
        Ok(Params::new()
            .with("StreamNames", names)
            .with("StreamSummaries", summaries)
            .with("HasMoreStreams", has_more))
    }

    /// Handle `DeleteStream`.
    fn handle_delete_stream(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::stream_name(params)?;
        let removed = self.streams.delete(name, None)?;
        let records: usize = removed.value.shards.iter().map(|s| s.records.len()).sum();
        info!(stream = %name, records, "deleted stream");
        Ok(Params::new())
    }

    /// Handle `PutRecord`.
    fn handle_put_record(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::stream_name(params)?;
        let partition_key = params.require_str("PartitionKey")?;
        if partition_key.is_empty() || partition_key.len() > MAX_PARTITION_KEY_LEN {
            return Err(ServiceError::validation(format!(
                "PartitionKey must be between 1 and {MAX_PARTITION_KEY_LEN} characters"
            )));
        }
        let data = params
            .blob("Data")?
            .ok_or_else(|| ServiceError::missing_parameter("Data"))?;
        if data.len() > MAX_RECORD_SIZE {
            return Err(ServiceError::validation(format!(
                "Record size {} exceeds the 1 MiB limit",
                data.len()
            )));
        }
        let key = match params.str("ExplicitHashKey") {
            Some(explicit) => explicit.parse::<u128>().map_err(|_| {
                ServiceError::validation(format!("Invalid ExplicitHashKey: {explicit}"))
            })?,
            None => hash_key(partition_key),
        };

        let mutation = self.streams.update(name, None, |s: &mut Stream| {
            s.last_sequence += 1;
            let sequence_number = format_sequence(s.last_sequence);
            let shard = s
                .shards
                .iter_mut()
                .find(|shard| (shard.starting_hash_key..=shard.ending_hash_key).contains(&key))
                .ok_or_else(|| ServiceError::internal("hash key not covered by any shard"))?;
            shard.records.push(StreamRecord {
                sequence_number: sequence_number.clone(),
                partition_key: partition_key.to_owned(),
                data,
                arrived_at: Utc::now(),
            });
            Ok::<_, ServiceError>((shard.id.clone(), sequence_number))
        })?;

        let (shard_id, sequence_number) = mutation.output;
        Ok(Params::new()
            .with("ShardId", shard_id)
            .with("SequenceNumber", sequence_number)
            .with("EncryptionType", "NONE"))
    }
}

impl Provider for KinesisProvider {
    fn name(&self) -> &'static str {
        "kinesis"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "CreateStream" => self.handle_create_stream(params),
            "DescribeStream" => self.handle_describe_stream(params),
            "DescribeStreamSummary" => self.handle_describe_stream_summary(params),
            "ListStreams" => self.handle_list_streams(params),
            "DeleteStream" => self.handle_delete_stream(params),
            "PutRecord" => self.handle_put_record(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.streams.reset();
    }
}

/// The Kinesis service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<KinesisProvider>> {
    Arc::new(ProtocolMock::new(
        KinesisProvider::new(scope.clone()),
        AwsJsonCodec::new(JsonVersion::V1_1, TARGET_PREFIX, NAMESPACE),
    ))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use mockstack_protocol::ServiceMock;
    use mockstack_protocol::cbor::{decode_map, encode_map};

    use super::*;

    fn provider() -> KinesisProvider {
        KinesisProvider::new(ResourceScope::default())
    }

    fn put(p: &KinesisProvider, stream: &str, key: &str) -> Params {
        p.dispatch(Call::new(
            "PutRecord",
            Params::new()
                .with("StreamName", stream)
                .with("PartitionKey", key)
                .with("Data", "aGVsbG8="),
        ))
        .unwrap()
        .params
    }

    #[test]
    fn test_should_default_to_one_shard() {
        let p = provider();
        p.dispatch(Call::new("CreateStream", Params::new().with("StreamName", "clicks")))
            .unwrap();
        let out = p
            .dispatch(Call::new("DescribeStream", Params::new().with("StreamName", "clicks")))
            .unwrap();
        let desc = out.params.map("StreamDescription").unwrap().unwrap();
        assert_eq!(desc.list("Shards").unwrap().len(), 1);
        assert_eq!(
            desc.str("StreamARN"),
            Some("arn:aws:kinesis:us-east-1:000000000000:stream/clicks")
        );
    }

    #[test]
    fn test_should_cover_hash_space_without_gaps() {
        let shards = split_shards(3);
        assert_eq!(shards[0].starting_hash_key, 0);
        assert_eq!(shards[0].ending_hash_key + 1, shards[1].starting_hash_key);
        assert_eq!(shards[1].ending_hash_key + 1, shards[2].starting_hash_key);
        assert_eq!(shards[2].ending_hash_key, u128::MAX);
    }

    #[test]
    fn test_should_issue_increasing_sequence_numbers() {
        let p = provider();
        p.dispatch(Call::new(
            "CreateStream",
            Params::new().with("StreamName", "s").with("ShardCount", 4),
        ))
        .unwrap();
        let first = put(&p, "s", "a");
        let second = put(&p, "s", "b");
        let third = put(&p, "s", "a");
        let seq = |p: &Params| p.str("SequenceNumber").unwrap().to_owned();
        assert!(seq(&first) < seq(&second));
        assert!(seq(&second) < seq(&third));
        assert_eq!(first.str("ShardId"), third.str("ShardId"));
    }

    #[test]
    fn test_should_reject_duplicate_and_missing_streams() {
        let p = provider();
        let create = Call::new("CreateStream", Params::new().with("StreamName", "dup"));
        p.dispatch(create.clone()).unwrap();
        let err = p.dispatch(create).unwrap_err().localize(&ERROR_CODES);
        assert_eq!(err.code, "ResourceInUseException");

        let err = p
            .dispatch(Call::new("DeleteStream", Params::new().with("StreamName", "nope")))
            .unwrap_err()
            .localize(&ERROR_CODES);
        assert_eq!(err.code, "ResourceNotFoundException");
    }

    #[test]
    fn test_should_serve_cbor_requests() {
        let kinesis = mock(&ResourceScope::default());
        let request = |op: &str, params: Params| {
            http::Request::builder()
                .method(http::Method::POST)
                .uri("/")
                .header("x-amz-target", format!("{TARGET_PREFIX}.{op}"))
                .header("content-type", "application/x-amz-cbor-1.1")
                .body(Bytes::from(encode_map(&params)))
                .unwrap()
        };
        let resp = kinesis.handle(request("CreateStream", Params::new().with("StreamName", "c")));
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = kinesis.handle(request(
            "PutRecord",
            Params::new()
                .with("StreamName", "c")
                .with("PartitionKey", "pk")
                .with("Data", Value::Blob(b"raw bytes".to_vec())),
        ));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/x-amz-cbor-1.1"
        );
        let out = decode_map(resp.body()).unwrap();
        assert_eq!(out.str("ShardId"), Some("shardId-000000000000"));
    }

    #[test]
    fn test_should_list_streams_with_has_more() {
        let p = provider();
        for name in ["a", "b", "c"] {
            p.dispatch(Call::new("CreateStream", Params::new().with("StreamName", name)))
                .unwrap();
        }
        let out = p
            .dispatch(Call::new("ListStreams", Params::new().with("Limit", 2)))
            .unwrap();
        assert_eq!(out.params.string_list("StreamNames").unwrap(), vec!["a", "b"]);
        assert!(out.params.bool_or("HasMoreStreams", false).unwrap());
    }
}
