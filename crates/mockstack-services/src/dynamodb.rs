//! Tables and items over `awsJson1.0` (`DynamoDB_20120810.<Operation>`).
//!
//! Items are stored inside their table record keyed by a fingerprint of
//! their primary key attributes, so a scan walks them in key order and
//! dropping a table drops its items.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockstack_core::{Params, Resource, ResourceScope, ResourceStore, Value};
use mockstack_protocol::{
    AwsJsonCodec, Call, ErrorCodes, ErrorKind, JsonVersion, Output, ProtocolMock, Provider,
    ServiceError,
};
use tracing::info;

/// `X-Amz-Target` prefix.
pub const TARGET_PREFIX: &str = "DynamoDB_20120810";

/// Error type namespace.
pub const NAMESPACE: &str = "com.amazonaws.dynamodb.v20120810";

const MIN_TABLE_NAME_LEN: usize = 3;
const MAX_TABLE_NAME_LEN: usize = 255;
const MAX_LIST_LIMIT: i64 = 100;

static ERROR_CODES: ErrorCodes = ErrorCodes {
    already_exists: "ResourceInUseException",
    ..ErrorCodes::DEFAULT
};

/// Role of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Partition key.
    Hash,
    /// Sort key.
    Range,
}

impl KeyType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "HASH",
            Self::Range => "RANGE",
        }
    }
}

/// A table definition and its items.
#[derive(Debug, Clone)]
pub struct Table {
    /// Table name; also its store id.
    pub name: String,
    /// Table ARN.
    pub arn: String,
    /// Key attributes, partition key first.
    pub key_schema: Vec<(String, KeyType)>,
    /// Attribute definitions as given.
    pub attribute_definitions: Vec<Value>,
    /// `PROVISIONED` or `PAY_PER_REQUEST`.
    pub billing_mode: String,
    /// Provisioned throughput as given.
    pub provisioned_throughput: Option<Params>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Items keyed by primary-key fingerprint.
    pub items: BTreeMap<String, Params>,
}

impl Resource for Table {
    const KIND: &'static str = "Table";

    fn name(&self) -> &str {
        &self.name
    }
}

impl Table {
    /// Fingerprint of the primary key carried by `item`.
    fn fingerprint(&self, item: &Params) -> Result<String, ServiceError> {
        let mut parts = Vec::with_capacity(self.key_schema.len());
        for (attr, _) in &self.key_schema {
            let value = item.get(attr).ok_or_else(|| {
                ServiceError::validation(format!(
                    "One or more parameter values were invalid: Missing the key {attr} in the item"
                ))
            })?;
            parts.push(key_part(attr, value)?);
        }
        Ok(parts.join("\u{1f}"))
    }

    /// Only the key attributes of `item`.
    fn key_of(&self, item: &Params) -> Params {
        self.key_schema
            .iter()
            .filter_map(|(attr, _)| item.get(attr).map(|v| (attr.clone(), v.clone())))
            .collect()
    }

    fn description(&self, status: &str) -> Params {
        let key_schema: Vec<Value> = self
            .key_schema
            .iter()
            .map(|(attr, kind)| {
                Params::new()
                    .with("AttributeName", attr.as_str())
                    .with("KeyType", kind.as_str())
                    .into()
            })
            .collect();
        let size: usize = self
            .items
            .values()
            .map(|item| item.iter().map(|(k, v)| k.len() + approximate_size(v)).sum::<usize>())
            .sum();
        Params::new()
            .with("TableName", self.name.as_str())
            .with("TableArn", self.arn.as_str())
            .with("TableStatus", status)
            .with("CreationDateTime", self.created)
            .with("KeySchema", key_schema)
            .with("AttributeDefinitions", self.attribute_definitions.clone())
            .with(
                "BillingModeSummary",
                Params::new().with("BillingMode", self.billing_mode.as_str()),
            )
            .with("ProvisionedThroughput", self.provisioned_throughput.clone())
            .with("ItemCount", self.items.len())
            .with("TableSizeBytes", size)
    }
}

/// `{"S": "abc"}` becomes `S:abc`; only scalar key types are accepted.
fn key_part(attr: &str, value: &Value) -> Result<String, ServiceError> {
    let invalid = || {
        ServiceError::validation(format!(
            "One or more parameter values were invalid: Invalid key attribute {attr}"
        ))
    };
    let typed = value.as_map().filter(|m| m.len() == 1).ok_or_else(invalid)?;
    let (kind, scalar) = typed.iter().next().ok_or_else(invalid)?;
    if !matches!(kind.as_str(), "S" | "N" | "B") {
        return Err(invalid());
    }
    let text = scalar.to_text().ok_or_else(invalid)?;
    Ok(format!("{kind}:{text}"))
}

fn approximate_size(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Blob(b) => b.len(),
        Value::List(items) => items.iter().map(approximate_size).sum(),
        Value::Map(map) => map.iter().map(|(k, v)| k.len() + approximate_size(v)).sum(),
        Value::Null => 0,
        _ => 8,
    }
}

fn validate_table_name(name: &str) -> Result<(), ServiceError> {
    if !(MIN_TABLE_NAME_LEN..=MAX_TABLE_NAME_LEN).contains(&name.len()) {
        return Err(ServiceError::validation(format!(
            "TableName must be at least 3 characters long and at most 255 characters long, \
             but was {} characters",
            name.len()
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err(ServiceError::validation(format!(
            "1 validation error detected: Value '{name}' at 'tableName' failed to satisfy \
             constraint: Member must satisfy regular expression pattern: [a-zA-Z0-9_.-]+"
        )));
    }
    Ok(())
}

/// Parse and check `KeySchema` against `AttributeDefinitions`.
fn parse_key_schema(params: &Params) -> Result<Vec<(String, KeyType)>, ServiceError> {
    let defined: Vec<&str> = params
        .list("AttributeDefinitions")?
        .iter()
        .filter_map(|d| d.as_map().and_then(|m| m.str("AttributeName")))
        .collect();

    let mut schema = Vec::new();
    for element in params.list("KeySchema")? {
        let element = element
            .as_map()
            .ok_or_else(|| ServiceError::validation("Invalid KeySchema element"))?;
        let attr = element.require_str("AttributeName")?;
        let kind = match element.require_str("KeyType")? {
            "HASH" => KeyType::Hash,
            "RANGE" => KeyType::Range,
            other => {
                return Err(ServiceError::validation(format!(
                    "Invalid KeyType {other}: must be HASH or RANGE"
                )));
            }
        };
        if !defined.contains(&attr) {
            return Err(ServiceError::validation(format!(
                "One or more parameter values were invalid: Some index key attributes are not \
                 defined in AttributeDefinitions. Keys: [{attr}]"
            )));
        }
        schema.push((attr.to_owned(), kind));
    }

    let hashes = schema.iter().filter(|(_, k)| *k == KeyType::Hash).count();
    let ranges = schema.len() - hashes;
    if hashes != 1 || ranges > 1 {
        return Err(ServiceError::validation(
            "Invalid KeySchema: exactly one HASH key and at most one RANGE key are required",
        ));
    }
    schema.sort_by_key(|(_, k)| *k == KeyType::Range);
    Ok(schema)
}

/// The DynamoDB provider.
#[derive(Debug)]
pub struct DynamoDbProvider {
    tables: ResourceStore<Table>,
    scope: ResourceScope,
}

impl DynamoDbProvider {
    /// Create a provider with no tables.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            tables: ResourceStore::new(),
            scope,
        }
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    /// Handle `CreateTable`.
    fn handle_create_table(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        validate_table_name(name)?;
        let key_schema = parse_key_schema(params)?;
        let billing_mode = params
            .str("BillingMode")
            .unwrap_or("PROVISIONED")
            .to_owned();

        let table = Table {
            name: name.to_owned(),
            arn: self.scope.arn("dynamodb", &format!("table/{name}")),
            key_schema,
            attribute_definitions: params.list("AttributeDefinitions")?.to_vec(),
            billing_mode,
            provisioned_throughput: params.map("ProvisionedThroughput")?.cloned(),
            created: Utc::now(),
            items: BTreeMap::new(),
        };
        let record = self.tables.create(name, table).map_err(|_| {
            ServiceError::already_exists(format!("Table already exists: {name}"))
        })?;
        info!(table = %name, "created table");
        Ok(Params::new().with("TableDescription", record.value.description("ACTIVE")))
    }

    /// Handle `DescribeTable`.
    fn handle_describe_table(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        let description = self
            .tables
            .inspect(name, |r| r.value.description("ACTIVE"))
            .map_err(|_| table_not_found(name))?;
        Ok(Params::new().with("Table", description))
    }

    /// Handle `ListTables`.
    fn handle_list_tables(&self, params: &Params) -> Result<Params, ServiceError> {
        let limit = params.i64_or("Limit", MAX_LIST_LIMIT)?;
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(ServiceError::validation(format!(
                "1 validation error detected: Value '{limit}' at 'limit' failed to satisfy \
                 constraint: Member must have value less than or equal to 100"
            )));
        }
        let limit = usize::try_from(limit).unwrap_or(1);
        let start = params.str("ExclusiveStartTableName");

        let names: Vec<String> = self
            .tables
            .list()
            .into_iter()
            .map(|r| r.value.name)
            .filter(|n| start.is_none_or(|s| n.as_str() > s))
            .take(limit + 1)
            .collect();

        let (names, last) = if names.len() > limit {
            let page = names[..limit].to_vec();
            let last = page.last().cloned();
            (page, last)
        } else {
            (names, None)
        };
        Ok(Params::new()
            .with("TableNames", names)
            .with("LastEvaluatedTableName", last))
    }

    /// Handle `UpdateTable`. Billing mode and throughput are recorded.
    fn handle_update_table(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        let billing_mode = params.str("BillingMode").map(ToOwned::to_owned);
        let throughput = params.map("ProvisionedThroughput")?.cloned();
        let mutation = self
            .tables
            .update(name, None, |t: &mut Table| {
                if let Some(mode) = billing_mode {
                    t.billing_mode = mode;
                }
                if throughput.is_some() {
                    t.provisioned_throughput = throughput;
                }
                Ok::<_, ServiceError>(t.description("ACTIVE"))
            })
            .map_err(|_| table_not_found(name))?;
        Ok(Params::new().with("TableDescription", mutation.output))
    }

    /// Handle `DeleteTable`.
    fn handle_delete_table(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        let removed = self
            .tables
            .delete(name, None)
            .map_err(|_| table_not_found(name))?;
        info!(table = %name, items = removed.value.items.len(), "deleted table");
        Ok(Params::new().with("TableDescription", removed.value.description("DELETING")))
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Handle `PutItem`.
    fn handle_put_item(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        let item = params
            .map("Item")?
            .cloned()
            .ok_or_else(|| ServiceError::missing_parameter("Item"))?;
        let return_old = wants_old_values(params)?;

        let mutation = self
            .tables
            .update(name, None, |t: &mut Table| {
                let fingerprint = t.fingerprint(&item)?;
                Ok::<_, ServiceError>(t.items.insert(fingerprint, item))
            })
            .map_err(|e| not_found_as_table(e, name))?;
        Ok(old_attributes(return_old, mutation.output))
    }

    /// Handle `GetItem`.
    fn handle_get_item(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        let key = params
            .map("Key")?
            .ok_or_else(|| ServiceError::missing_parameter("Key"))?;
        let table = self
            .tables
            .get(name)
            .ok_or_else(|| table_not_found(name))?
            .value;
        let fingerprint = table.fingerprint(key)?;
        Ok(Params::new().with("Item", table.items.get(&fingerprint).cloned()))
    }

    /// Handle `DeleteItem`. Deleting an absent item succeeds.
    fn handle_delete_item(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        let key = params
            .map("Key")?
            .cloned()
            .ok_or_else(|| ServiceError::missing_parameter("Key"))?;
        let return_old = wants_old_values(params)?;

        let mutation = self
            .tables
            .update(name, None, |t: &mut Table| {
                let fingerprint = t.fingerprint(&key)?;
                Ok::<_, ServiceError>(t.items.remove(&fingerprint))
            })
            .map_err(|e| not_found_as_table(e, name))?;
        Ok(old_attributes(return_old, mutation.output))
    }

    /// Handle `Scan`.
    fn handle_scan(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("TableName")?;
        let limit = params
            .opt_i64("Limit")?
            .map(|l| usize::try_from(l).unwrap_or(0))
            .filter(|l| *l > 0);
        let table = self
            .tables
            .get(name)
            .ok_or_else(|| table_not_found(name))?
            .value;

        let start = params
            .map("ExclusiveStartKey")?
            .map(|key| table.fingerprint(key))
            .transpose()?;
        let lower = start.as_deref().map_or(Bound::Unbounded, Bound::Excluded);
        let mut remaining = table.items.range::<str, _>((lower, Bound::Unbounded));

        let items: Vec<Params> = match limit {
            Some(limit) => remaining.by_ref().take(limit).map(|(_, v)| v.clone()).collect(),
            None => remaining.by_ref().map(|(_, v)| v.clone()).collect(),
        };
        let last_key = remaining
            .next()
            .and_then(|_| items.last().map(|item| table.key_of(item)));

        Ok(Params::new()
            .with("Count", items.len())
            .with("ScannedCount", items.len())
            .with("Items", items.into_iter().map(Value::Map).collect::<Vec<_>>())
            .with("LastEvaluatedKey", last_key))
    }
}

fn table_not_found(name: &str) -> ServiceError {
    ServiceError::not_found(format!(
        "Requested resource not found: Table: {name} not found"
    ))
}

fn not_found_as_table(err: ServiceError, name: &str) -> ServiceError {
    if err.kind == ErrorKind::NotFound {
        table_not_found(name)
    } else {
        err
    }
}

fn wants_old_values(params: &Params) -> Result<bool, ServiceError> {
    match params.str("ReturnValues").unwrap_or("NONE") {
        "NONE" => Ok(false),
        "ALL_OLD" => Ok(true),
        other => Err(ServiceError::validation(format!(
            "ReturnValues can only be ALL_OLD or NONE, got {other}"
        ))),
    }
}

fn old_attributes(wanted: bool, old: Option<Params>) -> Params {
    Params::new().with("Attributes", old.filter(|_| wanted))
}

impl Provider for DynamoDbProvider {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "CreateTable" => self.handle_create_table(params),
            "DescribeTable" => self.handle_describe_table(params),
            "ListTables" => self.handle_list_tables(params),
            "UpdateTable" => self.handle_update_table(params),
            "DeleteTable" => self.handle_delete_table(params),
            "PutItem" => self.handle_put_item(params),
            "GetItem" => self.handle_get_item(params),
            "DeleteItem" => self.handle_delete_item(params),
            "Scan" => self.handle_scan(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.tables.reset();
    }
}

/// The DynamoDB service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<DynamoDbProvider>> {
    Arc::new(ProtocolMock::new(
        DynamoDbProvider::new(scope.clone()),
        AwsJsonCodec::new(JsonVersion::V1_0, TARGET_PREFIX, NAMESPACE),
    ))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use mockstack_protocol::ServiceMock;

    use super::*;

    fn request(op: &str, body: serde_json::Value) -> http::Request<Bytes> {
        http::Request::builder()
            .method(http::Method::POST)
            .uri("/")
            .header("x-amz-target", format!("{TARGET_PREFIX}.{op}"))
            .header("content-type", "application/x-amz-json-1.0")
            .body(Bytes::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn json(resp: &http::Response<Bytes>) -> serde_json::Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    fn create_table(ddb: &ProtocolMock<DynamoDbProvider>, name: &str) -> http::Response<Bytes> {
        ddb.handle(request(
            "CreateTable",
            serde_json::json!({
                "TableName": name,
                "KeySchema": [
                    {"AttributeName": "sk", "KeyType": "RANGE"},
                    {"AttributeName": "pk", "KeyType": "HASH"}
                ],
                "AttributeDefinitions": [
                    {"AttributeName": "pk", "AttributeType": "S"},
                    {"AttributeName": "sk", "AttributeType": "N"}
                ],
                "BillingMode": "PAY_PER_REQUEST"
            }),
        ))
    }

    #[test]
    fn test_should_create_and_describe_table() {
        let ddb = mock(&ResourceScope::default());
        let resp = create_table(&ddb, "users");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(&resp);
        let desc = &body["TableDescription"];
        assert_eq!(desc["TableStatus"], "ACTIVE");
        assert_eq!(
            desc["TableArn"],
            "arn:aws:dynamodb:us-east-1:000000000000:table/users"
        );
        assert_eq!(desc["KeySchema"][0]["KeyType"], "HASH");
        assert!(desc["CreationDateTime"].is_number());

        let resp = ddb.handle(request("DescribeTable", serde_json::json!({"TableName": "users"})));
        assert_eq!(json(&resp)["Table"]["TableName"], "users");
    }

    #[test]
    fn test_should_reject_duplicate_table_as_in_use() {
        let ddb = mock(&ResourceScope::default());
        create_table(&ddb, "dup");
        let resp = create_table(&ddb, "dup");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json(&resp)["__type"],
            "com.amazonaws.dynamodb.v20120810#ResourceInUseException"
        );
    }

    #[test]
    fn test_should_report_missing_table() {
        let ddb = mock(&ResourceScope::default());
        let resp = ddb.handle(request("DescribeTable", serde_json::json!({"TableName": "nope"})));
        assert_eq!(
            json(&resp)["__type"],
            "com.amazonaws.dynamodb.v20120810#ResourceNotFoundException"
        );
    }

    #[test]
    fn test_should_put_get_and_delete_item() {
        let ddb = mock(&ResourceScope::default());
        create_table(&ddb, "items");
        let item = serde_json::json!({"pk": {"S": "u1"}, "sk": {"N": "1"}, "name": {"S": "Ada"}});
        let resp = ddb.handle(request(
            "PutItem",
            serde_json::json!({"TableName": "items", "Item": item}),
        ));
        assert_eq!(resp.status(), StatusCode::OK);

        let key = serde_json::json!({"pk": {"S": "u1"}, "sk": {"N": "1"}});
        let resp = ddb.handle(request(
            "GetItem",
            serde_json::json!({"TableName": "items", "Key": key}),
        ));
        assert_eq!(json(&resp)["Item"]["name"]["S"], "Ada");

        let resp = ddb.handle(request(
            "DeleteItem",
            serde_json::json!({"TableName": "items", "Key": key, "ReturnValues": "ALL_OLD"}),
        ));
        assert_eq!(json(&resp)["Attributes"]["name"]["S"], "Ada");

        let resp = ddb.handle(request(
            "GetItem",
            serde_json::json!({"TableName": "items", "Key": key}),
        ));
        assert!(json(&resp).get("Item").is_none());
    }

    #[test]
    fn test_should_require_key_attributes_on_put() {
        let ddb = mock(&ResourceScope::default());
        create_table(&ddb, "strict");
        let resp = ddb.handle(request(
            "PutItem",
            serde_json::json!({"TableName": "strict", "Item": {"pk": {"S": "a"}}}),
        ));
        assert_eq!(
            json(&resp)["__type"],
            "com.amazonaws.dynamodb.v20120810#ValidationException"
        );
    }

    #[test]
    fn test_should_paginate_scan_with_last_evaluated_key() {
        let ddb = mock(&ResourceScope::default());
        create_table(&ddb, "scan");
        for i in 0..3 {
            ddb.handle(request(
                "PutItem",
                serde_json::json!({"TableName": "scan", "Item": {"pk": {"S": format!("k{i}")}, "sk": {"N": "0"}}}),
            ));
        }
        let resp = ddb.handle(request("Scan", serde_json::json!({"TableName": "scan", "Limit": 2})));
        let body = json(&resp);
        assert_eq!(body["Count"], 2);
        let last = body["LastEvaluatedKey"].clone();
        assert_eq!(last["pk"]["S"], "k1");

        let resp = ddb.handle(request(
            "Scan",
            serde_json::json!({"TableName": "scan", "Limit": 2, "ExclusiveStartKey": last}),
        ));
        let body = json(&resp);
        assert_eq!(body["Count"], 1);
        assert_eq!(body["Items"][0]["pk"]["S"], "k2");
        assert!(body.get("LastEvaluatedKey").is_none());
    }

    #[test]
    fn test_should_page_list_tables_by_name() {
        let ddb = mock(&ResourceScope::default());
        for name in ["t-a", "t-b", "t-c"] {
            create_table(&ddb, name);
        }
        let resp = ddb.handle(request("ListTables", serde_json::json!({"Limit": 2})));
        let body = json(&resp);
        assert_eq!(body["TableNames"], serde_json::json!(["t-a", "t-b"]));
        assert_eq!(body["LastEvaluatedTableName"], "t-b");

        let resp = ddb.handle(request(
            "ListTables",
            serde_json::json!({"ExclusiveStartTableName": "t-b"}),
        ));
        let body = json(&resp);
        assert_eq!(body["TableNames"], serde_json::json!(["t-c"]));
        assert!(body.get("LastEvaluatedTableName").is_none());
    }

    #[test]
    fn test_should_drop_items_with_table() {
        let ddb = mock(&ResourceScope::default());
        create_table(&ddb, "tmp");
        ddb.handle(request(
            "PutItem",
            serde_json::json!({"TableName": "tmp", "Item": {"pk": {"S": "a"}, "sk": {"N": "1"}}}),
        ));
        let resp = ddb.handle(request("DeleteTable", serde_json::json!({"TableName": "tmp"})));
        assert_eq!(json(&resp)["TableDescription"]["TableStatus"], "DELETING");

        create_table(&ddb, "tmp");
        let resp = ddb.handle(request("Scan", serde_json::json!({"TableName": "tmp"})));
        assert_eq!(json(&resp)["Count"], 0);
    }
}
