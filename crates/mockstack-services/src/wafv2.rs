//! Web ACLs over `awsJson1.1` (`AWSWAF_20190729.<Operation>`).
//!
//! The store issues lock tokens: every create and update mints a new one,
//! and `UpdateWebACL`/`DeleteWebACL` must present the current token.

use std::collections::BTreeMap;
use std::sync::Arc;

use mockstack_core::{
    Params, Record, Resource, ResourceScope, ResourceStore, StoreError, Value, ids,
};
use mockstack_protocol::{
    AwsJsonCodec, Call, ErrorCodes, JsonVersion, Output, ProtocolMock, Provider, ServiceError,
};
use tracing::info;

/// `X-Amz-Target` prefix.
pub const TARGET_PREFIX: &str = "AWSWAF_20190729";

/// Error type namespace.
pub const NAMESPACE: &str = "com.amazonaws.wafv2";

const MAX_NAME_LEN: usize = 128;
const DEFAULT_LIST_LIMIT: i64 = 100;

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "WAFInvalidParameterException",
    not_found: "WAFNonexistentItemException",
    already_exists: "WAFDuplicateItemException",
    lock_conflict: "WAFOptimisticLockException",
    ..ErrorCodes::DEFAULT
};

/// Where a web ACL applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclScope {
    /// Regional resources (load balancers, API stages).
    Regional,
    /// CloudFront distributions.
    CloudFront,
}

impl AclScope {
    fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "REGIONAL" => Ok(Self::Regional),
            "CLOUDFRONT" => Ok(Self::CloudFront),
            other => Err(ServiceError::validation(format!(
                "Error reason: The scope is not valid., field: SCOPE_VALUE, parameter: {other}"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Regional => "REGIONAL",
            Self::CloudFront => "CLOUDFRONT",
        }
    }

    fn arn_segment(self) -> &'static str {
        match self {
            Self::Regional => "regional",
            Self::CloudFront => "global",
        }
    }
}

/// A web ACL.
#[derive(Debug, Clone)]
pub struct WebAcl {
    /// Name, unique within its scope.
    pub name: String,
    /// Generated id; also the store id.
    pub id: String,
    /// Scope.
    pub scope: AclScope,
    /// ARN.
    pub arn: String,
    /// Description.
    pub description: Option<String>,
    /// `DefaultAction` structure, stored as sent.
    pub default_action: Params,
    /// `Rules`, stored as sent.
    pub rules: Vec<Value>,
    /// `VisibilityConfig` structure, stored as sent.
    pub visibility_config: Params,
    /// Tags.
    pub tags: BTreeMap<String, String>,
}

impl Resource for WebAcl {
    const KIND: &'static str = "WebACL";

    fn name(&self) -> &str {
        &self.name
    }

    fn uniqueness_key(&self) -> String {
        format!("{}/{}", self.scope.as_str(), self.name)
    }
}

impl WebAcl {
    fn capacity(&self) -> usize {
        self.rules.len()
    }

    fn summary(&self, lock_token: Option<&str>) -> Params {
        Params::new()
            .with("Name", self.name.as_str())
            .with("Id", self.id.as_str())
            .with("Description", self.description.as_deref())
            .with("LockToken", lock_token)
            .with("ARN", self.arn.as_str())
    }

    fn detail(&self) -> Params {
        Params::new()
            .with("Name", self.name.as_str())
            .with("Id", self.id.as_str())
            .with("ARN", self.arn.as_str())
            .with("Description", self.description.as_deref())
            .with("DefaultAction", self.default_action.clone())
            .with("Rules", self.rules.clone())
            .with("VisibilityConfig", self.visibility_config.clone())
            .with("Capacity", self.capacity())
            .with("ManagedByFirewallManager", false)
            .with(
                "LabelNamespace",
                format!("awswaf:{}:webacl:{}:", self.arn_account(), self.name),
            )
    }

    fn arn_account(&self) -> &str {
        self.arn.split(':').nth(4).unwrap_or_default()
    }
}

fn token(record: &Record<WebAcl>) -> Option<&str> {
    record.lock_token.as_ref().map(|t| t.as_str())
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ServiceError::validation(format!(
            "Error reason: The name is not valid., field: NAME, parameter: {name}"
        )));
    }
    Ok(())
}

fn required_map(params: &Params, key: &str) -> Result<Params, ServiceError> {
    params
        .map(key)?
        .cloned()
        .ok_or_else(|| ServiceError::missing_parameter(key))
}

/// The WAFv2 provider.
#[derive(Debug)]
pub struct Wafv2Provider {
    acls: ResourceStore<WebAcl>,
    scope: ResourceScope,
}

impl Wafv2Provider {
    /// Create a provider with no web ACLs.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            acls: ResourceStore::new().with_lock_tokens(),
            scope,
        }
    }

    /// Resolve `Id`, checking that `Name` and `Scope` match the stored ACL.
    fn locate<'a>(&self, params: &'a Params) -> Result<&'a str, ServiceError> {
        let id = params.require_str("Id")?;
        let name = params.require_str("Name")?;
        let scope = AclScope::parse(params.require_str("Scope")?)?;
        let matches = self
            .acls
            .get(id)
            .is_some_and(|r| r.value.name == name && r.value.scope == scope);
        if !matches {
            return Err(ServiceError::not_found(
                "AWS WAF couldn't perform the operation because your resource doesn't exist.",
            ));
        }
        Ok(id)
    }

    /// Handle `CreateWebACL`.
    fn handle_create_web_acl(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("Name")?;
        validate_name(name)?;
        let scope = AclScope::parse(params.require_str("Scope")?)?;
        let id = ids::uuid();
        let acl = WebAcl {
            name: name.to_owned(),
            id: id.clone(),
            scope,
            arn: self.scope.arn(
                "wafv2",
                &format!("{}/webacl/{name}/{id}", scope.arn_segment()),
            ),
            description: params.str("Description").map(str::to_owned),
            default_action: required_map(params, "DefaultAction")?,
            rules: params.list("Rules")?.to_vec(),
            visibility_config: required_map(params, "VisibilityConfig")?,
            tags: params.string_map("Tags")?,
        };

        let record = self.acls.create(id.as_str(), acl).map_err(|err| match err {
            StoreError::AlreadyExists { .. } => ServiceError::already_exists(
                "AWS WAF couldn't perform the operation because some resource in your request is a duplicate of an existing one.",
            ),
            other => other.into(),
        })?;
        info!(web_acl = %name, id = %id, scope = scope.as_str(), "created web ACL");
        Ok(Params::new().with("Summary", record.value.summary(token(&record))))
    }

    /// Handle `GetWebACL`.
    fn handle_get_web_acl(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.locate(params)?;
        let (detail, lock_token) = self
            .acls
            .inspect(id, |r| (r.value.detail(), token(r).map(str::to_owned)))?;
        Ok(Params::new()
            .with("WebACL", detail)
            .with("LockToken", lock_token))
    }

    /// Handle `UpdateWebACL`.
    fn handle_update_web_acl(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.locate(params)?;
        let lock_token = params.require_str("LockToken")?;
        let default_action = required_map(params, "DefaultAction")?;
        let visibility_config = required_map(params, "VisibilityConfig")?;
        let rules = params.list("Rules")?.to_vec();
        let description = params.str("Description").map(str::to_owned);

        let mutation = self.acls.update(id, Some(lock_token), |acl: &mut WebAcl| {
            acl.default_action = default_action;
            acl.visibility_config = visibility_config;
            acl.rules = rules;
            if description.is_some() {
                acl.description = description;
            }
            Ok::<_, ServiceError>(())
        })?;
        Ok(Params::new().with(
            "NextLockToken",
            mutation.lock_token.as_ref().map(|t| t.as_str()),
        ))
    }

    /// Handle `DeleteWebACL`.
    fn handle_delete_web_acl(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.locate(params)?;
        let lock_token = params.require_str("LockToken")?;
        let removed = self.acls.delete(id, Some(lock_token))?;
        info!(web_acl = %removed.value.name, id = %id, "deleted web ACL");
        Ok(Params::new())
    }

    /// Handle `ListWebACLs`.
    fn handle_list_web_acls(&self, params: &Params) -> Result<Params, ServiceError> {
        let scope = AclScope::parse(params.require_str("Scope")?)?;
        let limit = params.i64_or("Limit", DEFAULT_LIST_LIMIT)?;
        if !(1..=DEFAULT_LIST_LIMIT).contains(&limit) {
            return Err(ServiceError::validation(format!(
                "Error reason: The limit is not valid., field: LIMIT, parameter: {limit}"
            )));
        }
        let page = self.acls.page(
            |acl| acl.scope == scope,
            usize::try_from(limit).unwrap_or(1),
            params.str("NextMarker"),
        )?;
        let acls: Vec<Value> = page
            .items
            .iter()
            .map(|r| r.value.summary(token(r)).into())
            .collect();
        Ok(Params::new()
            .with("WebACLs", acls)
            .with("NextMarker", page.next_token))
    }
}

impl Provider for Wafv2Provider {
    fn name(&self) -> &'static str {
        "wafv2"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "CreateWebACL" => self.handle_create_web_acl(params),
            "GetWebACL" => self.handle_get_web_acl(params),
            "UpdateWebACL" => self.handle_update_web_acl(params),
            "DeleteWebACL" => self.handle_delete_web_acl(params),
            "ListWebACLs" => self.handle_list_web_acls(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.acls.reset();
    }
}

/// The WAFv2 service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<Wafv2Provider>> {
    Arc::new(ProtocolMock::new(
        Wafv2Provider::new(scope.clone()),
        AwsJsonCodec::new(JsonVersion::V1_1, TARGET_PREFIX, NAMESPACE),
    ))
}
