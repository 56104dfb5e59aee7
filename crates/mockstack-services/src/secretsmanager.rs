//! Secrets over `awsJson1.1` (`secretsmanager.<Operation>`).
//!
//! Each secret record owns its versions. Staging labels move between
//! versions the way the real service moves them: writing a new value makes
//! it `AWSCURRENT` and demotes the old current version to `AWSPREVIOUS`.
//! Versions left without any label are dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use mockstack_core::{Params, Resource, ResourceScope, ResourceStore, StoreError, Value, ids};
use mockstack_protocol::{
    AwsJsonCodec, Call, ErrorCodes, ErrorKind, JsonVersion, Output, ProtocolMock, Provider,
    ServiceError,
};
use tracing::info;

/// `X-Amz-Target` prefix.
pub const TARGET_PREFIX: &str = "secretsmanager";

/// Error type namespace.
pub const NAMESPACE: &str = "com.amazonaws.secretsmanager";

const AWSCURRENT: &str = "AWSCURRENT";
const AWSPREVIOUS: &str = "AWSPREVIOUS";

const ARN_SUFFIX_LEN: usize = 6;
const MAX_NAME_LEN: usize = 512;
const DEFAULT_RECOVERY_WINDOW_DAYS: i64 = 30;
const MIN_RECOVERY_WINDOW_DAYS: i64 = 7;
const DEFAULT_PAGE_SIZE: i64 = 100;

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "InvalidParameterException",
    already_exists: "ResourceExistsException",
    ..ErrorCodes::DEFAULT
};

/// The payload of a secret version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretValue {
    /// `SecretString`.
    Text(String),
    /// `SecretBinary`.
    Binary(Vec<u8>),
}

/// One version of a secret.
#[derive(Debug, Clone)]
pub struct SecretVersion {
    /// Version id (the client request token when one was supplied).
    pub id: String,
    /// Stored value.
    pub value: SecretValue,
    /// Staging labels attached to this version.
    pub stages: Vec<String>,
    /// Creation time.
    pub created: DateTime<Utc>,
}

impl SecretVersion {
    fn has_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }
}

/// A secret and its versions.
#[derive(Debug, Clone)]
pub struct Secret {
    /// Friendly name.
    pub name: String,
    /// Full ARN (store id), ending in `-` plus six random characters.
    pub arn: String,
    /// Description.
    pub description: Option<String>,
    /// KMS key id, echoed back only.
    pub kms_key_id: Option<String>,
    /// Tags.
    pub tags: BTreeMap<String, String>,
    /// Versions, oldest first.
    pub versions: Vec<SecretVersion>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Time of the last change to value or metadata.
    pub last_changed: DateTime<Utc>,
    /// Scheduled deletion date, set by a soft `DeleteSecret`.
    pub deletion_date: Option<DateTime<Utc>>,
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";

    fn name(&self) -> &str {
        &self.name
    }
}

impl Secret {
    fn version_by_stage(&self, stage: &str) -> Option<&SecretVersion> {
        self.versions.iter().find(|v| v.has_stage(stage))
    }

    fn ensure_not_deleted(&self) -> Result<(), ServiceError> {
        if self.deletion_date.is_some() {
            return Err(invalid_request(
                "You can't perform this operation on the secret because it was marked for deletion.",
            ));
        }
        Ok(())
    }

    /// Add a version carrying `stages`, moving those labels off every other
    /// version. Moving `AWSCURRENT` demotes the old current version to
    /// `AWSPREVIOUS`.
    fn add_version(&mut self, version_id: String, value: SecretValue, stages: Vec<String>) {
        let now = Utc::now();
        if stages.iter().any(|s| s == AWSCURRENT) {
            for version in &mut self.versions {
                version.stages.retain(|s| s != AWSPREVIOUS);
            }
            for version in &mut self.versions {
                if version.has_stage(AWSCURRENT) {
                    version.stages.push(AWSPREVIOUS.to_owned());
                }
            }
        }
        for version in &mut self.versions {
            version.stages.retain(|s| !stages.contains(s));
        }
        self.versions.retain(|v| !v.stages.is_empty());
        self.versions.push(SecretVersion {
            id: version_id,
            value,
            stages,
            created: now,
        });
        self.last_changed = now;
    }

    fn versions_to_stages(&self) -> Params {
        self.versions
            .iter()
            .map(|v| (v.id.clone(), Value::from(v.stages.clone())))
            .collect()
    }

    fn tag_list(&self) -> Vec<Value> {
        self.tags
            .iter()
            .map(|(k, v)| Params::new().with("Key", k).with("Value", v).into())
            .collect()
    }

    fn describe(&self) -> Params {
        Params::new()
            .with("ARN", self.arn.as_str())
            .with("Name", self.name.as_str())
            .with("Description", self.description.as_deref())
            .with("KmsKeyId", self.kms_key_id.as_deref())
            .with("CreatedDate", self.created)
            .with("LastChangedDate", self.last_changed)
            .with("DeletedDate", self.deletion_date)
            .with("Tags", self.tag_list())
            .with("VersionIdsToStages", self.versions_to_stages())
    }
}

fn invalid_request(message: impl Into<String>) -> ServiceError {
    ServiceError::new(ErrorKind::Validation, "InvalidRequestException", message)
}

fn secret_not_found() -> ServiceError {
    ServiceError::not_found("Secrets Manager can't find the specified secret.")
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/_+=.@-".contains(c));
    if name.is_empty() || name.len() > MAX_NAME_LEN || !valid_chars {
        return Err(ServiceError::validation(format!(
            "Invalid name. Must be 1-{MAX_NAME_LEN} characters of letters, digits or /_+=.@-: {name}"
        )));
    }
    Ok(())
}

/// Read `SecretString` or `SecretBinary`; at most one may be present.
fn secret_value(params: &Params) -> Result<Option<SecretValue>, ServiceError> {
    let text = params.str("SecretString");
    let binary = params.blob("SecretBinary")?;
    match (text, binary) {
        (Some(_), Some(_)) => Err(ServiceError::validation(
            "You can't specify both a binary secret value and a string secret value in the same secret.",
        )),
        (Some(text), None) => Ok(Some(SecretValue::Text(text.to_owned()))),
        (None, Some(bytes)) => Ok(Some(SecretValue::Binary(bytes))),
        (None, None) => Ok(None),
    }
}

fn version_id(params: &Params) -> String {
    params
        .str("ClientRequestToken")
        .map_or_else(ids::uuid, str::to_owned)
}

/// The Secrets Manager provider.
#[derive(Debug)]
pub struct SecretsManagerProvider {
    secrets: ResourceStore<Secret>,
    scope: ResourceScope,
}

impl SecretsManagerProvider {
    /// Create a provider with no secrets.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            secrets: ResourceStore::new(),
            scope,
        }
    }

    /// Store id of the secret named by `SecretId`, which may be a name or an ARN.
    fn resolve(&self, params: &Params) -> Result<String, ServiceError> {
        let secret_id = params.require_str("SecretId")?;
        if self.secrets.get(secret_id).is_some() {
            return Ok(secret_id.to_owned());
        }
        self.secrets
            .find(|s| s.name == secret_id)
            .map(|r| r.id)
            .ok_or_else(secret_not_found)
    }

    /// Handle `CreateSecret`.
    fn handle_create_secret(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("Name")?;
        validate_name(name)?;
        let value = secret_value(params)?;
        let now = Utc::now();
        let arn = self.scope.arn(
            "secretsmanager",
            &format!("secret:{name}-{}", ids::random_alnum(ARN_SUFFIX_LEN)),
        );

        let mut secret = Secret {
            name: name.to_owned(),
            arn: arn.clone(),
            description: params.str("Description").map(str::to_owned),
            kms_key_id: params.str("KmsKeyId").map(str::to_owned),
            tags: params.string_map("Tags")?,
            versions: Vec::new(),
            created: now,
            last_changed: now,
            deletion_date: None,
        };
        let version = value.map(|value| {
            let id = version_id(params);
            secret.add_version(id.clone(), value, vec![AWSCURRENT.to_owned()]);
            id
        });

        self.secrets.create(arn.as_str(), secret).map_err(|err| {
            let scheduled = self
                .secrets
                .find(|s| s.name == name && s.deletion_date.is_some())
                .is_some();
            match err {
                StoreError::AlreadyExists { .. } if scheduled => invalid_request(
                    "You can't create this secret because a secret with this name is already scheduled for deletion.",
                ),
                StoreError::AlreadyExists { .. } => ServiceError::already_exists(format!(
                    "The operation failed because the secret {name} already exists."
                )),
                other => other.into(),
            }
        })?;
        info!(secret = %name, "created secret");

        Ok(Params::new()
            .with("ARN", arn)
            .with("Name", name)
            .with("VersionId", version))
    }

    /// Handle `DescribeSecret`.
    fn handle_describe_secret(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.resolve(params)?;
        Ok(self.secrets.inspect(&id, |r| r.value.describe())?)
    }

    /// Handle `GetSecretValue`.
    fn handle_get_secret_value(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.resolve(params)?;
        let requested_version = params.str("VersionId");
        let requested_stage = params.str("VersionStage");

        self.secrets.inspect(&id, |r| -> Result<Params, ServiceError> {
            let secret = &r.value;
            secret.ensure_not_deleted()?;
            let version = match (requested_version, requested_stage) {
                (Some(vid), stage) => secret
                    .versions
                    .iter()
                    .find(|v| v.id == vid && stage.is_none_or(|s| v.has_stage(s))),
                (None, stage) => secret.version_by_stage(stage.unwrap_or(AWSCURRENT)),
            }
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "Secrets Manager can't find the specified secret value for staging label: {}",
                    requested_stage.unwrap_or(AWSCURRENT)
                ))
            })?;

            let mut out = Params::new()
                .with("ARN", secret.arn.as_str())
                .with("Name", secret.name.as_str())
                .with("VersionId", version.id.as_str())
                .with("VersionStages", version.stages.clone())
                .with("CreatedDate", version.created);
            match &version.value {
                SecretValue::Text(text) => out.set("SecretString", text.as_str()),
                SecretValue::Binary(bytes) => out.set("SecretBinary", Value::Blob(bytes.clone())),
            };
            Ok(out)
        })?
    }

    /// Handle `PutSecretValue`.
    fn handle_put_secret_value(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.resolve(params)?;
        let value = secret_value(params)?.ok_or_else(|| {
            ServiceError::validation("You must provide either SecretString or SecretBinary.")
        })?;
        let version = version_id(params);
        let mut stages = params.string_list("VersionStages")?;
        if stages.is_empty() {
            stages.push(AWSCURRENT.to_owned());
        }

        let mutation = self.secrets.update(&id, None, |secret: &mut Secret| {
            secret.ensure_not_deleted()?;
            if let Some(existing) = secret.versions.iter().find(|v| v.id == version) {
                if existing.value != value {
                    return Err(ServiceError::already_exists(format!(
                        "You can't modify an existing version {version}; use a new ClientRequestToken."
                    )));
                }
                return Ok((secret.arn.clone(), secret.name.clone(), existing.stages.clone()));
            }
            secret.add_version(version.clone(), value, stages.clone());
            Ok::<_, ServiceError>((secret.arn.clone(), secret.name.clone(), stages))
        })?;

        let (arn, name, stages) = mutation.output;
        Ok(Params::new()
            .with("ARN", arn)
            .with("Name", name)
            .with("VersionId", version)
            .with("VersionStages", stages))
    }

    /// Handle `UpdateSecret`.
    fn handle_update_secret(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.resolve(params)?;
        let value = secret_value(params)?;
        let description = params.str("Description");
        let kms_key_id = params.str("KmsKeyId");

        let mutation = self.secrets.update(&id, None, |secret: &mut Secret| {
            secret.ensure_not_deleted()?;
            if let Some(description) = description {
                secret.description = Some(description.to_owned());
            }
            if let Some(kms_key_id) = kms_key_id {
                secret.kms_key_id = Some(kms_key_id.to_owned());
            }
            secret.last_changed = Utc::now();
            let version = value.map(|value| {
                let version = version_id(params);
                secret.add_version(version.clone(), value, vec![AWSCURRENT.to_owned()]);
                version
            });
            Ok::<_, ServiceError>((secret.arn.clone(), secret.name.clone(), version))
        })?;

        let (arn, name, version) = mutation.output;
        Ok(Params::new()
            .with("ARN", arn)
            .with("Name", name)
            .with("VersionId", version))
    }

    /// Handle `ListSecrets`.
    fn handle_list_secrets(&self, params: &Params) -> Result<Params, ServiceError> {
        let max = params.i64_or("MaxResults", DEFAULT_PAGE_SIZE)?;
        if !(1..=DEFAULT_PAGE_SIZE).contains(&max) {
            return Err(ServiceError::validation(format!(
                "MaxResults must be between 1 and {DEFAULT_PAGE_SIZE}"
            )));
        }
        let include_deleted = params.bool_or("IncludePlannedDeletion", false)?;
        let page = self.secrets.page(
            |s| include_deleted || s.deletion_date.is_none(),
            usize::try_from(max).unwrap_or(1),
            params.str("NextToken"),
        )?;
        let secrets: Vec<Value> = page
            .items
            .iter()
            .map(|r| r.value.describe().into())
            .collect();
        Ok(Params::new()
            .with("SecretList", secrets)
            .with("NextToken", page.next_token))
    }

    /// Handle `DeleteSecret`.
    fn handle_delete_secret(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.resolve(params)?;
        let force = params.bool_or("ForceDeleteWithoutRecovery", false)?;
        let window = params.opt_i64("RecoveryWindowInDays")?;
        if force && window.is_some() {
            return Err(ServiceError::validation(
                "You can't use ForceDeleteWithoutRecovery in conjunction with RecoveryWindowInDays.",
            ));
        }

        if force {
            let removed = self.secrets.delete(&id, None)?;
            info!(secret = %removed.value.name, "deleted secret without recovery");
            return Ok(Params::new()
                .with("ARN", removed.value.arn)
                .with("Name", removed.value.name)
                .with("DeletionDate", Utc::now()));
        }

        let days = window.unwrap_or(DEFAULT_RECOVERY_WINDOW_DAYS);
        if !(MIN_RECOVERY_WINDOW_DAYS..=DEFAULT_RECOVERY_WINDOW_DAYS).contains(&days) {
            return Err(ServiceError::validation(format!(
                "RecoveryWindowInDays must be between {MIN_RECOVERY_WINDOW_DAYS} and {DEFAULT_RECOVERY_WINDOW_DAYS} days"
            )));
        }
        let mutation = self.secrets.update(&id, None, |secret: &mut Secret| {
            secret.ensure_not_deleted()?;
            let date = Utc::now() + TimeDelta::days(days);
            secret.deletion_date = Some(date);
            Ok::<_, ServiceError>((secret.arn.clone(), secret.name.clone(), date))
        })?;

        let (arn, name, date) = mutation.output;
        info!(secret = %name, days, "scheduled secret deletion");
        Ok(Params::new()
            .with("ARN", arn)
            .with("Name", name)
            .with("DeletionDate", date))
    }

    /// Handle `RestoreSecret`.
    fn handle_restore_secret(&self, params: &Params) -> Result<Params, ServiceError> {
        let id = self.resolve(params)?;
        let mutation = self.secrets.update(&id, None, |secret: &mut Secret| {
            secret.deletion_date = None;
            Ok::<_, ServiceError>((secret.arn.clone(), secret.name.clone()))
        })?;
        let (arn, name) = mutation.output;
        Ok(Params::new().with("ARN", arn).with("Name", name))
    }
}

impl Provider for SecretsManagerProvider {
    fn name(&self) -> &'static str {
        "secretsmanager"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "CreateSecret" => self.handle_create_secret(params),
            "DescribeSecret" => self.handle_describe_secret(params),
            "GetSecretValue" => self.handle_get_secret_value(params),
            "PutSecretValue" => self.handle_put_secret_value(params),
            "UpdateSecret" => self.handle_update_secret(params),
            "ListSecrets" => self.handle_list_secrets(params),
            "DeleteSecret" => self.handle_delete_secret(params),
            "RestoreSecret" => self.handle_restore_secret(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.secrets.reset();
    }
}

/// The Secrets Manager service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<SecretsManagerProvider>> {
    Arc::new(ProtocolMock::new(
        SecretsManagerProvider::new(scope.clone()),
        AwsJsonCodec::new(JsonVersion::V1_1, TARGET_PREFIX, NAMESPACE),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> SecretsManagerProvider {
        SecretsManagerProvider::new(ResourceScope::default())
    }

    fn call(p: &SecretsManagerProvider, op: &str, params: Params) -> Result<Params, ServiceError> {
        p.dispatch(Call::new(op, params))
            .map(|out| out.params)
            .map_err(|err| err.localize(&ERROR_CODES))
    }

    fn create(p: &SecretsManagerProvider, name: &str, value: &str) -> Params {
        call(
            p,
            "CreateSecret",
            Params::new().with("Name", name).with("SecretString", value),
        )
        .unwrap()
    }

    fn current_value(p: &SecretsManagerProvider, id: &str) -> String {
        call(p, "GetSecretValue", Params::new().with("SecretId", id))
            .unwrap()
            .str("SecretString")
            .unwrap()
            .to_owned()
    }

    #[test]
    fn test_should_build_arn_with_random_suffix() {
        let p = provider();
        let out = create(&p, "db/password", "hunter2");
        let arn = out.str("ARN").unwrap();
        let prefix = "arn:aws:secretsmanager:us-east-1:000000000000:secret:db/password-";
        assert!(arn.starts_with(prefix));
        assert_eq!(arn.len(), prefix.len() + ARN_SUFFIX_LEN);
    }

    #[test]
    fn test_should_look_up_by_name_or_arn() {
        let p = provider();
        let arn = create(&p, "token", "abc").str("ARN").unwrap().to_owned();
        assert_eq!(current_value(&p, "token"), "abc");
        assert_eq!(current_value(&p, &arn), "abc");

        let err = call(&p, "GetSecretValue", Params::new().with("SecretId", "nope")).unwrap_err();
        assert_eq!(err.code, "ResourceNotFoundException");
    }

    #[test]
    fn test_should_rotate_staging_labels() {
        let p = provider();
        let first = create(&p, "s", "v1").str("VersionId").unwrap().to_owned();
        call(
            &p,
            "PutSecretValue",
            Params::new().with("SecretId", "s").with("SecretString", "v2"),
        )
        .unwrap();
        assert_eq!(current_value(&p, "s"), "v2");

        let previous = call(
            &p,
            "GetSecretValue",
            Params::new()
                .with("SecretId", "s")
                .with("VersionStage", AWSPREVIOUS),
        )
        .unwrap();
        assert_eq!(previous.str("SecretString"), Some("v1"));
        assert_eq!(previous.str("VersionId"), Some(first.as_str()));

        call(
            &p,
            "PutSecretValue",
            Params::new().with("SecretId", "s").with("SecretString", "v3"),
        )
        .unwrap();
        let described = call(&p, "DescribeSecret", Params::new().with("SecretId", "s")).unwrap();
        let stages = described.map("VersionIdsToStages").unwrap().unwrap();
        assert_eq!(stages.len(), 2);
        assert!(stages.get(&first).is_none());
    }

    #[test]
    fn test_should_reject_duplicate_name() {
        let p = provider();
        create(&p, "dup", "x");
        let err = call(
            &p,
            "CreateSecret",
            Params::new().with("Name", "dup").with("SecretString", "y"),
        )
        .unwrap_err();
        assert_eq!(err.code, "ResourceExistsException");
    }

    #[test]
    fn test_should_soft_delete_and_restore() {
        let p = provider();
        create(&p, "soft", "x");
        let out = call(&p, "DeleteSecret", Params::new().with("SecretId", "soft")).unwrap();
        assert!(out.get("DeletionDate").is_some());

        let err = call(&p, "GetSecretValue", Params::new().with("SecretId", "soft")).unwrap_err();
        assert_eq!(err.code, "InvalidRequestException");

        let listed = call(&p, "ListSecrets", Params::new()).unwrap();
        assert!(listed.list("SecretList").unwrap().is_empty());
        let listed = call(
            &p,
            "ListSecrets",
            Params::new().with("IncludePlannedDeletion", true),
        )
        .unwrap();
        assert_eq!(listed.list("SecretList").unwrap().len(), 1);

        call(&p, "RestoreSecret", Params::new().with("SecretId", "soft")).unwrap();
        assert_eq!(current_value(&p, "soft"), "x");
    }

    #[test]
    fn test_should_force_delete_immediately() {
        let p = provider();
        create(&p, "gone", "x");
        call(
            &p,
            "DeleteSecret",
            Params::new()
                .with("SecretId", "gone")
                .with("ForceDeleteWithoutRecovery", true),
        )
        .unwrap();
        let err = call(&p, "DescribeSecret", Params::new().with("SecretId", "gone")).unwrap_err();
        assert_eq!(err.code, "ResourceNotFoundException");
        create(&p, "gone", "again");
    }

    #[test]
    fn test_should_reject_force_with_recovery_window() {
        let p = provider();
        create(&p, "both", "x");
        let err = call(
            &p,
            "DeleteSecret",
            Params::new()
                .with("SecretId", "both")
                .with("ForceDeleteWithoutRecovery", true)
                .with("RecoveryWindowInDays", 7),
        )
        .unwrap_err();
        assert_eq!(err.code, "InvalidParameterException");
    }

    #[test]
    fn test_should_update_description_without_new_version() {
        let p = provider();
        create(&p, "meta", "x");
        let out = call(
            &p,
            "UpdateSecret",
            Params::new().with("SecretId", "meta").with("Description", "db creds"),
        )
        .unwrap();
        assert!(out.get("VersionId").is_none());
        let described = call(&p, "DescribeSecret", Params::new().with("SecretId", "meta")).unwrap();
        assert_eq!(described.str("Description"), Some("db creds"));
        assert_eq!(described.map("VersionIdsToStages").unwrap().unwrap().len(), 1);
    }
}
