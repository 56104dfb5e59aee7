//! Error types for the MockStack core.

/// Core error type for MockStack infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum MockStackError {
    /// Invalid AWS account ID format.
    #[error("invalid AWS account ID: {0} (must be 12-digit numeric string)")]
    InvalidAccountId(String),

    /// Region name that cannot appear in an ARN.
    #[error("invalid AWS region: {0}")]
    InvalidRegion(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result type for MockStack infrastructure operations.
pub type MockStackResult<T> = Result<T, MockStackError>;

/// Failure of a typed accessor on a [`Params`](crate::Params) bag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    /// A required parameter was absent (or null).
    #[error("missing required parameter: {0}")]
    Missing(String),

    /// A parameter was present but had the wrong shape.
    #[error("invalid value for parameter {name}: expected {expected}")]
    InvalidType {
        /// Parameter name.
        name: String,
        /// Human-readable description of the expected type.
        expected: &'static str,
    },
}

/// Errors produced by a [`ResourceStore`](crate::ResourceStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No entry with the given identifier exists.
    #[error("{kind} {id} does not exist")]
    NotFound {
        /// Resource kind, e.g. `"Queue"`.
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An entry with the same unique name already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind.
        kind: &'static str,
        /// The conflicting name.
        name: String,
    },

    /// The supplied lock token does not match the current one.
    #[error("the lock token for {kind} {id} is stale")]
    LockConflict {
        /// Resource kind.
        kind: &'static str,
        /// The identifier of the entry.
        id: String,
    },

    /// A pagination token could not be decoded.
    #[error("invalid pagination token: {0}")]
    InvalidToken(String),
}
