//! Pub/sub topics over the `awsQuery` dialect.
//!
//! Topics are keyed by ARN and unique by name. Subscriptions and published
//! messages are nested in their topic, so `DeleteTopic` drops them too.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::StatusCode;
use mockstack_core::{Params, Resource, ResourceScope, ResourceStore, Value, ids};
use mockstack_protocol::xml::{entries, members};
use mockstack_protocol::{
    AwsQueryCodec, Call, ErrorCodes, Output, ProtocolMock, Provider, ServiceError,
};
use tracing::info;

/// XML namespace of every SNS document.
pub const NAMESPACE: &str = "http://sns.amazonaws.com/doc/2010-03-31/";

const MAX_TOPIC_NAME_LEN: usize = 256;
const LIST_PAGE_SIZE: usize = 100;

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "InvalidParameter",
    not_found: "NotFound",
    already_exists: "InvalidParameter",
    lock_conflict: "ConcurrentAccess",
    unknown_operation: "InvalidAction",
    not_found_status: StatusCode::NOT_FOUND,
    conflict_status: StatusCode::BAD_REQUEST,
};

/// A subscription of an endpoint to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Subscription ARN (`<topic arn>:<uuid>`).
    pub arn: String,
    /// Delivery protocol, e.g. `sqs` or `email`.
    pub protocol: String,
    /// Delivery endpoint.
    pub endpoint: String,
}

/// A message accepted by `Publish`.
#[derive(Debug, Clone)]
pub struct Published {
    /// Message id.
    pub id: String,
    /// Optional subject.
    pub subject: Option<String>,
    /// Message text.
    pub message: String,
    /// Publish time.
    pub at: DateTime<Utc>,
}

/// A topic with its subscriptions and publish history.
#[derive(Debug, Clone)]
pub struct Topic {
    /// Topic name.
    pub name: String,
    /// Topic ARN; also its store id.
    pub arn: String,
    /// Settable attributes such as `DisplayName`.
    pub attributes: BTreeMap<String, String>,
    /// Tags.
    pub tags: BTreeMap<String, String>,
    /// Subscriptions, oldest first.
    pub subscriptions: Vec<Subscription>,
    /// Messages published so far.
    pub published: Vec<Published>,
}

impl Resource for Topic {
    const KIND: &'static str = "Topic";

    fn name(&self) -> &str {
        &self.name
    }
}

fn validate_topic_name(name: &str) -> Result<(), ServiceError> {
    let stem = name.strip_suffix(".fifo").unwrap_or(name);
    let valid = !stem.is_empty()
        && name.len() <= MAX_TOPIC_NAME_LEN
        && stem
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "Invalid parameter: Topic Name: {name}"
        )))
    }
}

/// Topic ARN that owns a subscription ARN.
fn topic_of(subscription_arn: &str) -> Option<&str> {
    subscription_arn.rsplit_once(':').map(|(topic, _)| topic)
}

/// The SNS provider.
#[derive(Debug)]
pub struct SnsProvider {
    topics: ResourceStore<Topic>,
    scope: ResourceScope,
}

impl SnsProvider {
    /// Create a provider with no topics.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            topics: ResourceStore::new(),
            scope,
        }
    }

    fn subscription_params(&self, topic_arn: &str, sub: &Subscription) -> Value {
        Params::new()
            .with("SubscriptionArn", sub.arn.as_str())
            .with("Owner", self.scope.account.as_str())
            .with("Protocol", sub.protocol.as_str())
            .with("Endpoint", sub.endpoint.as_str())
            .with("TopicArn", topic_arn)
            .into()
    }

    /// Handle `CreateTopic`. Creating an existing name returns its ARN.
    fn handle_create_topic(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("Name")?;
        validate_topic_name(name)?;
        let arn = self.scope.arn("sns", name);
        let topic = Topic {
            name: name.to_owned(),
            arn: arn.clone(),
            attributes: params.string_map("Attributes")?,
            tags: params.string_map("Tags")?,
            subscriptions: Vec::new(),
            published: Vec::new(),
        };
        let (record, created) = self.topics.upsert(
            topic,
            || arn,
            |existing, incoming| {
                existing.attributes.extend(incoming.attributes);
                existing.tags.extend(incoming.tags);
            },
        );
        if created {
            info!(topic = %record.id, "created topic");
        }
        Ok(Params::new().with("TopicArn", record.id))
    }

    /// Handle `ListTopics`.
    fn handle_list_topics(&self, params: &Params) -> Result<Params, ServiceError> {
        let page = self
            .topics
            .page(|_| true, LIST_PAGE_SIZE, params.str("NextToken"))?;
        let topics: Vec<Value> = page
            .items
            .into_iter()
            .map(|r| Params::new().with("TopicArn", r.id).into())
            .collect();
        Ok(Params::new()
            .with("Topics", members(topics))
            .with("NextToken", page.next_token))
    }

    /// Handle `GetTopicAttributes`.
    fn handle_get_topic_attributes(&self, params: &Params) -> Result<Params, ServiceError> {
        let arn = params.require_str("TopicArn")?;
        let topic = self.topics.require(arn)?.value;
        let mut attrs = topic.attributes.clone();
        attrs.insert("TopicArn".to_owned(), topic.arn.clone());
        attrs.insert("Owner".to_owned(), self.scope.account.clone());
        attrs
            .entry("DisplayName".to_owned())
            .or_default();
        attrs.insert(
            "SubscriptionsConfirmed".to_owned(),
            topic.subscriptions.len().to_string(),
        );
        attrs.insert("SubscriptionsPending".to_owned(), "0".to_owned());
        attrs.insert("SubscriptionsDeleted".to_owned(), "0".to_owned());
        Ok(Params::new().with("Attributes", entries(&attrs)))
    }

    /// Handle `SetTopicAttributes`.
    fn handle_set_topic_attributes(&self, params: &Params) -> Result<Params, ServiceError> {
        let arn = params.require_str("TopicArn")?;
        let name = params.require_str("AttributeName")?.to_owned();
        let value = params.str("AttributeValue").unwrap_or("").to_owned();
        self.topics.update(arn, None, |t: &mut Topic| {
            t.attributes.insert(name, value);
            Ok::<_, ServiceError>(())
        })?;
        Ok(Params::new())
    }

    /// Handle `DeleteTopic`. Deleting an unknown topic succeeds.
    fn handle_delete_topic(&self, params: &Params) -> Result<Params, ServiceError> {
        let arn = params.require_str("TopicArn")?;
        if let Ok(removed) = self.topics.delete(arn, None) {
            info!(
                topic = %arn,
                subscriptions = removed.value.subscriptions.len(),
                "deleted topic",
            );
        }
        Ok(Params::new())
    }

    /// Handle `Subscribe`. An identical subscription is returned as-is.
    fn handle_subscribe(&self, params: &Params) -> Result<Params, ServiceError> {
        let arn = params.require_str("TopicArn")?;
        let protocol = params.require_str("Protocol")?;
        let endpoint = params.str("Endpoint").unwrap_or("");

        let mutation = self.topics.update(arn, None, |t: &mut Topic| {
            if let Some(existing) = t
                .subscriptions
                .iter()
                .find(|s| s.protocol == protocol && s.endpoint == endpoint)
            {
                return Ok::<_, ServiceError>(existing.arn.clone());
            }
            let sub_arn = format!("{arn}:{}", ids::uuid());
            t.subscriptions.push(Subscription {
                arn: sub_arn.clone(),
                protocol: protocol.to_owned(),
                endpoint: endpoint.to_owned(),
            });
            Ok(sub_arn)
        })?;
        Ok(Params::new().with("SubscriptionArn", mutation.output))
    }

    /// Handle `Unsubscribe`.
    fn handle_unsubscribe(&self, params: &Params) -> Result<Params, ServiceError> {
        let sub_arn = params.require_str("SubscriptionArn")?;
        let not_found = || ServiceError::not_found(format!("Subscription does not exist: {sub_arn}"));
        let topic_arn = topic_of(sub_arn).ok_or_else(not_found)?;
        self.topics
            .update(topic_arn, None, |t: &mut Topic| {
                let before = t.subscriptions.len();
                t.subscriptions.retain(|s| s.arn != sub_arn);
                if t.subscriptions.len() == before {
                    return Err(not_found());
                }
                Ok(())
            })
            .map_err(|_| not_found())?;
        Ok(Params::new())
    }

    /// Handle `ListSubscriptions`.
    fn handle_list_subscriptions(&self) -> Params {
        let subs: Vec<Value> = self
            .topics
            .list()
            .iter()
            .flat_map(|r| {
                r.value
                    .subscriptions
                    .iter()
                    .map(|s| self.subscription_params(&r.id, s))
            })
            .collect();
        Params::new().with("Subscriptions", members(subs))
    }

    /// Handle `ListSubscriptionsByTopic`.
    fn handle_list_subscriptions_by_topic(&self, params: &Params) -> Result<Params, ServiceError> {
        let arn = params.require_str("TopicArn")?;
        let subs = self.topics.inspect(arn, |r| {
            r.value
                .subscriptions
                .iter()
                .map(|s| self.subscription_params(arn, s))
                .collect::<Vec<_>>()
        })?;
        Ok(Params::new().with("Subscriptions", members(subs)))
    }

    /// Handle `Publish`.
    fn handle_publish(&self, params: &Params) -> Result<Params, ServiceError> {
        let arn = params
            .str("TopicArn")
            .or_else(|| params.str("TargetArn"))
            .ok_or_else(|| ServiceError::missing_parameter("TopicArn"))?;
        let message = params.require_str("Message")?;
        if message.is_empty() {
            return Err(ServiceError::validation(
                "Invalid parameter: Empty message",
            ));
        }
        let id = ids::uuid();
        self.topics.update(arn, None, |t: &mut Topic| {
            t.published.push(Published {
                id: id.clone(),
                subject: params.str("Subject").map(ToOwned::to_owned),
                message: message.to_owned(),
                at: Utc::now(),
            });
            Ok::<_, ServiceError>(())
        })?;
        tracing::debug!(topic = %arn, message_id = %id, "published message");
        Ok(Params::new().with("MessageId", id))
    }
}

impl Provider for SnsProvider {
    fn name(&self) -> &'static str {
        "sns"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "CreateTopic" => self.handle_create_topic(params),
            "ListTopics" => self.handle_list_topics(params),
            "GetTopicAttributes" => self.handle_get_topic_attributes(params),
            "SetTopicAttributes" => self.handle_set_topic_attributes(params),
            "DeleteTopic" => self.handle_delete_topic(params),
            "Subscribe" => self.handle_subscribe(params),
            "Unsubscribe" => self.handle_unsubscribe(params),
            "ListSubscriptions" => Ok(self.handle_list_subscriptions()),
            "ListSubscriptionsByTopic" => self.handle_list_subscriptions_by_topic(params),
            "Publish" => self.handle_publish(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.topics.reset();
    }
}

/// The SNS service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<SnsProvider>> {
    Arc::new(ProtocolMock::new(
        SnsProvider::new(scope.clone()),
        AwsQueryCodec::new(NAMESPACE),
    ))
}
