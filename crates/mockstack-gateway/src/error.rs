//! Gateway error types.

use std::net::AddrParseError;

/// A request could not be matched to a registered mock.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// No mock is registered under the resolved service name.
    #[error("unknown service: {0}")]
    UnknownService(String),
}

/// Failure to start a [`MockServer`](crate::MockServer).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The listen address does not parse.
    #[error("invalid bind address {addr}: {source}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Parse failure.
        source: AddrParseError,
    },

    /// The listener could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The configured address.
        addr: String,
        /// I/O failure.
        source: std::io::Error,
    },
}
