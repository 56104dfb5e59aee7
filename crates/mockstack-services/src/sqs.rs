//! Message queues over `awsJson1.0` (`AmazonSQS.<Operation>`).
//!
//! Messages are nested in their queue record; a message becomes invisible
//! for the visibility timeout after each receive and is only removed by
//! `DeleteMessage` with the receipt handle of its latest receive.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use md5::{Digest, Md5};
use mockstack_core::{Params, Resource, ResourceScope, ResourceStore, Value, ids};
use mockstack_protocol::{
    AwsJsonCodec, Call, ErrorCodes, ErrorKind, JsonVersion, Output, ProtocolMock, Provider,
    ServiceError,
};
use tracing::info;

/// `X-Amz-Target` prefix.
pub const TARGET_PREFIX: &str = "AmazonSQS";

/// Error type namespace.
pub const NAMESPACE: &str = "com.amazonaws.sqs";

const MAX_QUEUE_NAME_LEN: usize = 80;
const MAX_RECEIVE_BATCH: i64 = 10;
const MAX_VISIBILITY_TIMEOUT: i64 = 43_200;
const MAX_DELAY_SECONDS: i64 = 900;
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Attributes every queue starts with.
const DEFAULT_ATTRIBUTES: [(&str, &str); 5] = [
    ("DelaySeconds", "0"),
    ("MaximumMessageSize", "262144"),
    ("MessageRetentionPeriod", "345600"),
    ("ReceiveMessageWaitTimeSeconds", "0"),
    ("VisibilityTimeout", "30"),
];

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "InvalidParameterValue",
    not_found: "QueueDoesNotExist",
    already_exists: "QueueNameExists",
    ..ErrorCodes::DEFAULT
};

/// A message sitting in a queue.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message id returned by `SendMessage`.
    pub id: String,
    /// Message body.
    pub body: String,
    /// MD5 hex digest of the body.
    pub md5_of_body: String,
    /// Time of `SendMessage`.
    pub sent_at: DateTime<Utc>,
    /// The message is receivable at and after this instant.
    pub visible_at: DateTime<Utc>,
    /// Number of times received.
    pub receive_count: u32,
    /// Receipt handle of the latest receive.
    pub receipt_handle: Option<String>,
}

impl Message {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.visible_at <= now
    }
}

/// A queue and its messages.
#[derive(Debug, Clone)]
pub struct Queue {
    /// Queue name; also its store id.
    pub name: String,
    /// Queue URL handed to callers.
    pub url: String,
    /// Queue ARN.
    pub arn: String,
    /// Configurable attributes.
    pub attributes: BTreeMap<String, String>,
    /// Tags given at creation.
    pub tags: BTreeMap<String, String>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Messages in send order.
    pub messages: VecDeque<Message>,
}

impl Resource for Queue {
    const KIND: &'static str = "Queue";

    fn name(&self) -> &str {
        &self.name
    }
}

impl Queue {
    fn visibility_timeout(&self) -> i64 {
        self.attributes
            .get("VisibilityTimeout")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
    }

    fn delay_seconds(&self) -> i64 {
        self.attributes
            .get("DelaySeconds")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Configured attributes plus the computed ones.
    fn all_attributes(&self) -> BTreeMap<String, String> {
        let now = Utc::now();
        let visible = self.messages.iter().filter(|m| m.is_visible(now)).count();
        let mut attrs = self.attributes.clone();
        attrs.insert("QueueArn".to_owned(), self.arn.clone());
        attrs.insert(
            "CreatedTimestamp".to_owned(),
            self.created.timestamp().to_string(),
        );
        attrs.insert(
            "ApproximateNumberOfMessages".to_owned(),
            visible.to_string(),
        );
        attrs.insert(
            "ApproximateNumberOfMessagesNotVisible".to_owned(),
            (self.messages.len() - visible).to_string(),
        );
        attrs
    }
}

/// Reject `value` unless it lies in `0..=max` seconds.
fn check_seconds(name: &str, value: i64, max: i64) -> Result<i64, ServiceError> {
    if (0..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ServiceError::validation(format!(
            "Value {value} for parameter {name} is invalid. Reason: Must be between 0 and {max}."
        )))
    }
}

/// Validate the timing attributes a caller may set on a queue.
fn validate_queue_attributes(attrs: &BTreeMap<String, String>) -> Result<(), ServiceError> {
    for (name, max) in [
        ("DelaySeconds", MAX_DELAY_SECONDS),
        ("VisibilityTimeout", MAX_VISIBILITY_TIMEOUT),
    ] {
        if let Some(raw) = attrs.get(name) {
            let value = raw.parse::<i64>().map_err(|_| {
                ServiceError::validation(format!("Invalid value for the parameter {name}."))
            })?;
            check_seconds(name, value, max)?;
        }
    }
    Ok(())
}

/// `now` shifted by `secs`, saturating at the latest representable instant.
fn seconds_after(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(secs)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Name of the queue addressed by a queue URL (its last path segment).
fn queue_name_from_url(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

fn validate_queue_name(name: &str) -> Result<(), ServiceError> {
    let stem = name.strip_suffix(".fifo").unwrap_or(name);
    let valid = !stem.is_empty()
        && name.len() <= MAX_QUEUE_NAME_LEN
        && stem
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "Can only include alphanumeric characters, hyphens, or underscores. 1 to 80 in length: {name}"
        )))
    }
}

fn md5_hex(data: &str) -> String {
    hex::encode(Md5::digest(data.as_bytes()))
}

fn invalid_receipt_handle(handle: &str) -> ServiceError {
    ServiceError::new(
        ErrorKind::Validation,
        "ReceiptHandleIsInvalid",
        format!("The input receipt handle \"{handle}\" is not a valid receipt handle."),
    )
}

fn string_map_params(map: BTreeMap<String, String>) -> Params {
    map.into()
}

/// The SQS provider.
#[derive(Debug)]
pub struct SqsProvider {
    queues: ResourceStore<Queue>,
    scope: ResourceScope,
}

impl SqsProvider {
    /// Create a provider with no queues.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            queues: ResourceStore::new(),
            scope,
        }
    }

    fn queue_id(params: &Params) -> Result<&str, ServiceError> {
        Ok(queue_name_from_url(params.require_str("QueueUrl")?))
    }

    /// Handle `CreateQueue`.
    ///
    /// Re-creating a queue with the same name and compatible attributes
    /// returns the existing URL.
    fn handle_create_queue(&self, call: &Call) -> Result<Params, ServiceError> {
        let name = call.params.require_str("QueueName")?;
        validate_queue_name(name)?;
        let requested = call.params.string_map("Attributes")?;
        validate_queue_attributes(&requested)?;
        let tags = call.params.string_map("tags")?;

        let mut attributes: BTreeMap<String, String> = DEFAULT_ATTRIBUTES
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        attributes.extend(requested.clone());

        let queue = Queue {
            name: name.to_owned(),
            url: format!("http://{}/{}/{name}", call.host(), self.scope.account),
            arn: self.scope.arn("sqs", name),
            attributes,
            tags,
            created: Utc::now(),
            messages: VecDeque::new(),
        };

        let url = match self.queues.create(name, queue) {
            Ok(record) => {
                info!(queue = %name, "created queue");
                record.value.url
            }
            Err(err) => {
                let existing = self.queues.get(name).ok_or(err)?;
                let compatible = requested
                    .iter()
                    .all(|(k, v)| existing.value.attributes.get(k) == Some(v));
                if !compatible {
                    return Err(ServiceError::already_exists(format!(
                        "A queue already exists with the same name and a different value for attribute(s): {name}"
                    )));
                }
                existing.value.url
            }
        };
        Ok(Params::new().with("QueueUrl", url))
    }

    /// Handle `GetQueueUrl`.
    fn handle_get_queue_url(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("QueueName")?;
        let queue = self.queues.require(name)?;
        Ok(Params::new().with("QueueUrl", queue.value.url))
    }

    /// Handle `ListQueues`.
    fn handle_list_queues(&self, params: &Params) -> Result<Params, ServiceError> {
        let prefix = params.str("QueueNamePrefix").unwrap_or("");
        let max = params
            .opt_i64("MaxResults")?
            .map_or(DEFAULT_PAGE_SIZE, |m| usize::try_from(m).unwrap_or(1));
        let page = self
            .queues
            .page(|q| q.name.starts_with(prefix), max, params.str("NextToken"))?;
        let urls: Vec<Value> = page.items.into_iter().map(|r| r.value.url.into()).collect();
        Ok(Params::new()
            .with("QueueUrls", urls)
            .with("NextToken", page.next_token))
    }

    /// Handle `DeleteQueue`. Pending messages go with it.
    fn handle_delete_queue(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        let removed = self.queues.delete(name, None)?;
        info!(
            queue = %name,
            dropped_messages = removed.value.messages.len(),
            "deleted queue",
        );
        Ok(Params::new())
    }

    /// Handle `GetQueueAttributes`.
    fn handle_get_queue_attributes(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        let wanted = params.string_list("AttributeNames")?;
        let mut attrs = self.queues.inspect(name, |r| r.value.all_attributes())?;
        if !wanted.iter().any(|n| n == "All") {
            attrs.retain(|k, _| wanted.contains(k));
        }
        Ok(Params::new().with("Attributes", string_map_params(attrs)))
    }

    /// Handle `SetQueueAttributes`.
    fn handle_set_queue_attributes(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        let updates = params.string_map("Attributes")?;
        validate_queue_attributes(&updates)?;
        self.queues.update(name, None, |q: &mut Queue| {
            q.attributes.extend(updates);
            Ok::<_, ServiceError>(())
        })?;
        Ok(Params::new())
    }

    /// Handle `SendMessage`.
    fn handle_send_message(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        let body = params.require_str("MessageBody")?;
        if body.is_empty() {
            return Err(ServiceError::new(
                ErrorKind::Validation,
                "MissingParameter",
                "The request must contain the parameter MessageBody.",
            ));
        }
        let delay = params
            .opt_i64("DelaySeconds")?
            .map(|d| check_seconds("DelaySeconds", d, MAX_DELAY_SECONDS))
            .transpose()?;

        let message_id = ids::uuid();
        let md5_of_body = md5_hex(body);
        let mutation = self.queues.update(name, None, |q: &mut Queue| {
            let now = Utc::now();
            let delay = delay.unwrap_or_else(|| q.delay_seconds());
            q.messages.push_back(Message {
                id: message_id.clone(),
                body: body.to_owned(),
                md5_of_body: md5_of_body.clone(),
                sent_at: now,
                visible_at: seconds_after(now, delay),
                receive_count: 0,
                receipt_handle: None,
            });
            Ok::<_, ServiceError>(q.messages.len())
        })?;
        tracing::debug!(queue = %name, depth = mutation.output, "enqueued message");

        Ok(Params::new()
            .with("MessageId", message_id)
            .with("MD5OfMessageBody", md5_of_body))
    }

    /// Handle `ReceiveMessage`.
    fn handle_receive_message(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        let max = params.i64_or("MaxNumberOfMessages", 1)?;
        if !(1..=MAX_RECEIVE_BATCH).contains(&max) {
            return Err(ServiceError::validation(format!(
                "Value {max} for parameter MaxNumberOfMessages is invalid. Reason: Must be between 1 and 10, if provided."
            )));
        }
        let batch = usize::try_from(max).unwrap_or(1);
        let timeout = params
            .opt_i64("VisibilityTimeout")?
            .map(|t| check_seconds("VisibilityTimeout", t, MAX_VISIBILITY_TIMEOUT))
            .transpose()?;

        let mutation = self.queues.update(name, None, |q: &mut Queue| {
            let now = Utc::now();
            let hidden_for = timeout.unwrap_or_else(|| q.visibility_timeout());
            let mut received = Vec::new();
            for message in q.messages.iter_mut().filter(|m| m.is_visible(now)).take(batch) {
                let handle = ids::random_alnum(64);
                message.visible_at = seconds_after(now, hidden_for);
                message.receive_count += 1;
                message.receipt_handle = Some(handle.clone());
                received.push(Value::from(
                    Params::new()
                        .with("MessageId", message.id.as_str())
                        .with("ReceiptHandle", handle)
                        .with("MD5OfBody", message.md5_of_body.as_str())
                        .with("Body", message.body.as_str())
                        .with(
                            "Attributes",
                            Params::new()
                                .with("ApproximateReceiveCount", message.receive_count.to_string())
                                .with(
                                    "SentTimestamp",
                                    message.sent_at.timestamp_millis().to_string(),
                                ),
                        ),
                ));
            }
            Ok::<_, ServiceError>(received)
        })?;

        Ok(Params::new().with("Messages", mutation.output))
    }

    /// Handle `DeleteMessage`.
    fn handle_delete_message(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        let handle = params.require_str("ReceiptHandle")?;
        self.queues.update(name, None, |q: &mut Queue| {
            let position = q
                .messages
                .iter()
                .position(|m| m.receipt_handle.as_deref() == Some(handle))
                .ok_or_else(|| invalid_receipt_handle(handle))?;
            q.messages.remove(position);
            Ok::<_, ServiceError>(())
        })?;
        Ok(Params::new())
    }

    /// Handle `ChangeMessageVisibility`.
    fn handle_change_message_visibility(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        let handle = params.require_str("ReceiptHandle")?;
        let timeout = check_seconds(
            "VisibilityTimeout",
            params.require_i64("VisibilityTimeout")?,
            MAX_VISIBILITY_TIMEOUT,
        )?;
        self.queues.update(name, None, |q: &mut Queue| {
            let message = q
                .messages
                .iter_mut()
                .find(|m| m.receipt_handle.as_deref() == Some(handle))
                .ok_or_else(|| invalid_receipt_handle(handle))?;
            message.visible_at = seconds_after(Utc::now(), timeout);
            Ok::<_, ServiceError>(())
        })?;
        Ok(Params::new())
    }

    /// Handle `PurgeQueue`.
    fn handle_purge_queue(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = Self::queue_id(params)?;
        self.queues.update(name, None, |q: &mut Queue| {
            q.messages.clear();
            Ok::<_, ServiceError>(())
        })?;
        Ok(Params::new())
    }
}

impl Provider for SqsProvider {
    fn name(&self) -> &'static str {
        "sqs"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "CreateQueue" => self.handle_create_queue(&call),
            "GetQueueUrl" => self.handle_get_queue_url(params),
            "ListQueues" => self.handle_list_queues(params),
            "DeleteQueue" => self.handle_delete_queue(params),
            "GetQueueAttributes" => self.handle_get_queue_attributes(params),
            "SetQueueAttributes" => self.handle_set_queue_attributes(params),
            "SendMessage" => self.handle_send_message(params),
            "ReceiveMessage" => self.handle_receive_message(params),
            "DeleteMessage" => self.handle_delete_message(params),
            "ChangeMessageVisibility" => self.handle_change_message_visibility(params),
            "PurgeQueue" => self.handle_purge_queue(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.queues.reset();
    }
}

/// The SQS service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<SqsProvider>> {
    Arc::new(ProtocolMock::new(
        SqsProvider::new(scope.clone()),
        AwsJsonCodec::new(JsonVersion::V1_0, TARGET_PREFIX, NAMESPACE),
    ))
}
