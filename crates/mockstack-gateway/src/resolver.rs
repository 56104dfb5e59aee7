//! Request-to-service resolution.
//!
//! Resolution looks only at headers, in this order:
//!
//! 1. the service segment of the SigV4 credential scope in `Authorization`
//!    (`Credential=AKID/20240101/us-east-1/sqs/aws4_request`);
//! 2. the prefix of `X-Amz-Target` (`DynamoDB_20120810.PutItem`);
//! 3. the default object-storage service.

use http::HeaderMap;
use http::header::AUTHORIZATION;

/// Service used when nothing in the request names one.
pub const DEFAULT_SERVICE: &str = "s3";

/// Last segment of a SigV4 credential scope.
const SCOPE_TERMINATOR: &str = "aws4_request";

/// Known `X-Amz-Target` prefixes (lower-cased) and the service they address.
const TARGET_PREFIXES: [(&str, &str); 5] = [
    ("dynamodb", "dynamodb"),
    ("kinesis", "kinesis"),
    ("secretsmanager", "secretsmanager"),
    ("amazonsqs", "sqs"),
    ("awswaf", "wafv2"),
];

/// Which header decided the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// The credential scope of the `Authorization` header.
    CredentialScope,
    /// The `X-Amz-Target` header.
    TargetHeader,
    /// Nothing matched; the default service was chosen.
    Default,
}

/// The outcome of [`resolve_service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Lower-case service name, as registered in the mock registry.
    pub service: String,
    /// Where the name came from.
    pub source: ResolutionSource,
}

/// Determine the target service of a request from its headers.
///
/// This is a pure function: identical headers always yield the same
/// resolution.
///
/// # Examples
///
/// ```
/// use http::HeaderMap;
/// use mockstack_gateway::resolver::{ResolutionSource, resolve_service};
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-amz-target", "AmazonSQS.SendMessage".parse().unwrap());
/// let resolution = resolve_service(&headers);
/// assert_eq!(resolution.service, "sqs");
/// assert_eq!(resolution.source, ResolutionSource::TargetHeader);
/// ```
#[must_use]
pub fn resolve_service(headers: &HeaderMap) -> Resolution {
    if let Some(service) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(credential_scope_service)
    {
        return Resolution {
            service,
            source: ResolutionSource::CredentialScope,
        };
    }

    if let Some(service) = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .and_then(target_service)
    {
        return Resolution {
            service,
            source: ResolutionSource::TargetHeader,
        };
    }

    Resolution {
        service: DEFAULT_SERVICE.to_owned(),
        source: ResolutionSource::Default,
    }
}

/// Extract the service segment of a credential scope.
///
/// Accepts a full SigV4 `Authorization` value or a bare scope string.
fn credential_scope_service(authorization: &str) -> Option<String> {
    let credential = match authorization.find("Credential=") {
        Some(idx) => {
            let rest = &authorization[idx + "Credential=".len()..];
            rest.split([',', ' ']).next().unwrap_or(rest)
        }
        None => authorization.trim(),
    };

    let mut segments = credential.rsplit('/');
    if segments.next()? != SCOPE_TERMINATOR {
        return None;
    }
    let service = segments.next()?.trim();
    (!service.is_empty()).then(|| service.to_ascii_lowercase())
}

/// Map an `X-Amz-Target` value to a service name.
fn target_service(target: &str) -> Option<String> {
    let prefix = target.split('.').next()?.trim().to_ascii_lowercase();
    if prefix.is_empty() {
        return None;
    }
    let known = TARGET_PREFIXES
        .iter()
        .find(|(known, _)| prefix.starts_with(known))
        .map(|(_, service)| (*service).to_owned());
    Some(known.unwrap_or(prefix))
}
