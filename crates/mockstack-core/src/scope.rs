//! The fixed identity every emulated resource is created under.

use crate::{MockStackError, MockStackResult};

/// Pseudo account every emulated resource belongs to.
pub const DEFAULT_ACCOUNT: &str = "000000000000";

/// Region every emulated resource lives in unless configured otherwise.
pub const DEFAULT_REGION: &str = "us-east-1";

/// The single (partition, account, region) triple the emulator runs under.
///
/// Every ARN a service mock hands out is built from one shared scope so that
/// tests can assert on predictable substrings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    /// Twelve-digit account that owns every resource.
    pub account: String,
    /// Region every resource lives in.
    pub region: String,
}

impl Default for ResourceScope {
    fn default() -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_owned(),
            region: DEFAULT_REGION.to_owned(),
        }
    }
}

impl ResourceScope {
    /// ARN partition.
    pub const PARTITION: &str = "aws";

    /// Create a scope, checking that both halves can appear in an ARN.
    ///
    /// # Errors
    /// [`MockStackError::InvalidAccountId`] unless `account` is twelve ASCII
    /// digits; [`MockStackError::InvalidRegion`] unless `region` looks like
    /// `eu-west-1`.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> MockStackResult<Self> {
        let account = account.into();
        if account.len() != 12 || !account.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MockStackError::InvalidAccountId(account));
        }
        let region = region.into();
        if !is_region_name(&region) {
            return Err(MockStackError::InvalidRegion(region));
        }
        Ok(Self { account, region })
    }

    /// Build an ARN: `arn:aws:<service>:<region>:<account>:<resource>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mockstack_core::ResourceScope;
    ///
    /// let scope = ResourceScope::default();
    /// assert_eq!(
    ///     scope.arn("sns", "alerts"),
    ///     "arn:aws:sns:us-east-1:000000000000:alerts",
    /// );
    /// ```
    #[must_use]
    pub fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{service}:{}:{}:{resource}",
            Self::PARTITION,
            self.region,
            self.account
        )
    }

    /// Build a typed ARN: `arn:aws:<service>:<region>:<account>:<type>/<name>/<id>`.
    #[must_use]
    pub fn typed_arn(&self, service: &str, resource_type: &str, name: &str, id: &str) -> String {
        self.arn(service, &format!("{resource_type}/{name}/{id}"))
    }

    /// Build a global ARN (empty region), as used by S3 buckets.
    #[must_use]
    pub fn global_arn(&self, service: &str, resource: &str) -> String {
        format!("arn:{}:{service}:::{resource}", Self::PARTITION)
    }
}

/// Lowercase dash-separated words ending in a number, e.g. `ap-southeast-2`.
fn is_region_name(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    let Some((last, words)) = parts.split_last() else {
        return false;
    };
    words.len() >= 2
        && words
            .iter()
            .all(|w| !w.is_empty() && w.bytes().all(|b| b.is_ascii_lowercase()))
        && !last.is_empty()
        && last.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_accept_valid_scope() {
        let scope = ResourceScope::new("123456789012", "eu-west-1").unwrap();
        assert_eq!(scope.arn("sqs", "q"), "arn:aws:sqs:eu-west-1:123456789012:q");
    }

    #[test]
    fn test_should_reject_malformed_account() {
        for account in ["12345", "abcdefghijkl", "1234567890123"] {
            let err = ResourceScope::new(account, DEFAULT_REGION).unwrap_err();
            assert!(matches!(err, MockStackError::InvalidAccountId(_)), "{account}");
        }
    }

    #[test]
    fn test_should_reject_malformed_region() {
        for region in ["", "useast1", "US-EAST-1", "us-east-", "us-east-1:evil"] {
            let err = ResourceScope::new(DEFAULT_ACCOUNT, region).unwrap_err();
            assert!(matches!(err, MockStackError::InvalidRegion(_)), "{region}");
        }
        assert!(ResourceScope::new(DEFAULT_ACCOUNT, "us-gov-west-1").is_ok());
    }

    #[test]
    fn test_should_default_to_placeholder_identity() {
        let scope = ResourceScope::default();
        assert_eq!(scope.account, "000000000000");
        assert_eq!(scope.region, "us-east-1");
    }

    #[test]
    fn test_should_build_typed_arn() {
        let scope = ResourceScope::new(DEFAULT_ACCOUNT, "eu-west-1").unwrap();
        assert_eq!(
            scope.typed_arn("wafv2", "regional/webacl", "acl", "abc123"),
            "arn:aws:wafv2:eu-west-1:000000000000:regional/webacl/acl/abc123",
        );
    }

    #[test]
    fn test_should_build_global_arn() {
        let scope = ResourceScope::default();
        assert_eq!(scope.global_arn("s3", "bucket"), "arn:aws:s3:::bucket");
    }
}
