//! Built-in service mocks for MockStack.
//!
//! Each module pairs a [`Provider`](mockstack_protocol::Provider) holding one
//! [`ResourceStore`](mockstack_core::ResourceStore) with the codec of the
//! service's wire dialect, and exposes a `mock(scope)` constructor. Every
//! service is behind a Cargo feature of the same name; all are on by default.
//!
//! | Service          | Dialect                       |
//! |------------------|-------------------------------|
//! | `s3`             | restXml                       |
//! | `sqs`            | awsJson 1.0                   |
//! | `sns`            | awsQuery                      |
//! | `dynamodb`       | awsJson 1.0                   |
//! | `kinesis`        | awsJson 1.1 (+ CBOR)          |
//! | `secretsmanager` | awsJson 1.1                   |
//! | `wafv2`          | awsJson 1.1                   |
//! | `apigateway`     | restJson1                     |
//! | `monitoring`     | rpcv2Cbor                     |

use std::sync::Arc;

use mockstack_core::ResourceScope;
use mockstack_protocol::ServiceMock;

#[cfg(feature = "apigateway")]
pub mod apigateway;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
#[cfg(feature = "kinesis")]
pub mod kinesis;
#[cfg(feature = "monitoring")]
pub mod monitoring;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "secretsmanager")]
pub mod secretsmanager;
#[cfg(feature = "sns")]
pub mod sns;
#[cfg(feature = "sqs")]
pub mod sqs;
#[cfg(feature = "wafv2")]
pub mod wafv2;

/// Fresh instances of every compiled-in service mock, sharing `scope`.
#[must_use]
pub fn builtin_mocks(scope: &ResourceScope) -> Vec<Arc<dyn ServiceMock>> {
    let mut mocks: Vec<Arc<dyn ServiceMock>> = Vec::new();
    #[cfg(feature = "s3")]
    mocks.push(s3::mock(scope));
    #[cfg(feature = "sqs")]
    mocks.push(sqs::mock(scope));
    #[cfg(feature = "sns")]
    mocks.push(sns::mock(scope));
    #[cfg(feature = "dynamodb")]
    mocks.push(dynamodb::mock(scope));
    #[cfg(feature = "kinesis")]
    mocks.push(kinesis::mock(scope));
    #[cfg(feature = "secretsmanager")]
    mocks.push(secretsmanager::mock(scope));
    #[cfg(feature = "wafv2")]
    mocks.push(wafv2::mock(scope));
    #[cfg(feature = "apigateway")]
    mocks.push(apigateway::mock(scope));
    #[cfg(feature = "monitoring")]
    mocks.push(monitoring::mock(scope));
    mocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_build_every_default_service() {
        let mocks = builtin_mocks(&ResourceScope::default());
        let mut names: Vec<&str> = mocks.iter().map(|m| m.name()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "apigateway",
                "dynamodb",
                "kinesis",
                "monitoring",
                "s3",
                "secretsmanager",
                "sns",
                "sqs",
                "wafv2",
            ]
        );
    }
}
