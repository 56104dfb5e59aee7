//! Wire-level error taxonomy.
//!
//! A [`ServiceError`] is what a service mock returns when an operation fails.
//! Codecs render it in the dialect's native error envelope. Errors raised
//! from typed accessors or the resource store carry a *generic* code that
//! [`ServiceError::localize`] replaces with the owning service's own code
//! (e.g. `NoSuchBucket`, `QueueDoesNotExist`) before encoding.

use std::fmt;

use http::StatusCode;
use mockstack_core::{ParamError, StoreError};

/// Broad error category, independent of any service's error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed parameter.
    Validation,
    /// The referenced resource does not exist.
    NotFound,
    /// Duplicate create or optimistic-lock mismatch.
    Conflict,
    /// The request body could not be parsed.
    Decode,
    /// The operation is not implemented by this mock.
    UnsupportedOperation,
    /// Failure on the emulator side.
    Internal,
}

impl ErrorKind {
    /// Status used when nothing more specific is known.
    #[must_use]
    pub fn default_status(self) -> StatusCode {
        match self {
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenericCode {
    Validation,
    NotFound,
    AlreadyExists,
    LockConflict,
    UnknownOperation,
}

/// Per-service error code table used by [`ServiceError::localize`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorCodes {
    /// Code for missing/malformed parameters.
    pub validation: &'static str,
    /// Code for a missing resource.
    pub not_found: &'static str,
    /// Code for a duplicate create.
    pub already_exists: &'static str,
    /// Code for a stale lock token.
    pub lock_conflict: &'static str,
    /// Code for an unknown operation.
    pub unknown_operation: &'static str,
    /// Status for a missing resource.
    pub not_found_status: StatusCode,
    /// Status for duplicates and lock conflicts.
    pub conflict_status: StatusCode,
}

impl ErrorCodes {
    /// Codes used when a service declares none of its own.
    pub const DEFAULT: Self = Self {
        validation: "ValidationException",
        not_found: "ResourceNotFoundException",
        already_exists: "ResourceAlreadyExistsException",
        lock_conflict: "OptimisticLockException",
        unknown_operation: "UnknownOperationException",
        not_found_status: StatusCode::BAD_REQUEST,
        conflict_status: StatusCode::BAD_REQUEST,
    };

    fn code(&self, generic: GenericCode) -> &'static str {
        match generic {
            GenericCode::Validation => self.validation,
            GenericCode::NotFound => self.not_found,
            GenericCode::AlreadyExists => self.already_exists,
            GenericCode::LockConflict => self.lock_conflict,
            GenericCode::UnknownOperation => self.unknown_operation,
        }
    }

    fn status(&self, generic: GenericCode) -> StatusCode {
        match generic {
            GenericCode::NotFound => self.not_found_status,
            GenericCode::AlreadyExists | GenericCode::LockConflict => self.conflict_status,
            GenericCode::Validation | GenericCode::UnknownOperation => StatusCode::BAD_REQUEST,
        }
    }
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// An error destined for the wire.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// Broad category.
    pub kind: ErrorKind,
    /// Service-native error code, e.g. `ResourceNotFoundException`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status.
    pub status: StatusCode,
    generic: Option<GenericCode>,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

impl ServiceError {
    /// An error with an explicit code.
    #[must_use]
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            status: kind.default_status(),
            generic: None,
        }
    }

    fn generic(kind: ErrorKind, generic: GenericCode, message: impl Into<String>) -> Self {
        let codes = ErrorCodes::DEFAULT;
        Self {
            kind,
            code: codes.code(generic).to_owned(),
            message: message.into(),
            status: codes.status(generic),
            generic: Some(generic),
        }
    }

    /// Override the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    // -- Convenience constructors --

    /// Invalid parameter, localized to the service's validation code.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::generic(ErrorKind::Validation, GenericCode::Validation, message)
    }

    /// Required parameter missing.
    #[must_use]
    pub fn missing_parameter(name: &str) -> Self {
        Self::validation(format!("missing required parameter: {name}"))
    }

    /// Resource missing, localized to the service's not-found code.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::generic(ErrorKind::NotFound, GenericCode::NotFound, message)
    }

    /// Duplicate create, localized to the service's already-exists code.
    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::generic(ErrorKind::Conflict, GenericCode::AlreadyExists, message)
    }

    /// Stale lock token, localized to the service's lock-conflict code.
    #[must_use]
    pub fn lock_conflict(message: impl Into<String>) -> Self {
        Self::generic(ErrorKind::Conflict, GenericCode::LockConflict, message)
    }

    /// Operation not implemented by this mock.
    #[must_use]
    pub fn unsupported_operation(operation: &str) -> Self {
        Self::generic(
            ErrorKind::UnsupportedOperation,
            GenericCode::UnknownOperation,
            format!("operation {operation} is not supported by this service"),
        )
    }

    /// Request body could not be parsed.
    #[must_use]
    pub fn decode(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, code, message)
    }

    /// Emulator-side failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "InternalFailure", message)
    }

    /// Map a store failure through the service's code table.
    #[must_use]
    pub fn from_store(err: StoreError, codes: &ErrorCodes) -> Self {
        Self::from(err).localize(codes)
    }

    /// Replace a generic code and status with the service's own.
    ///
    /// Errors constructed with an explicit code are returned unchanged.
    #[must_use]
    pub fn localize(mut self, codes: &ErrorCodes) -> Self {
        if let Some(generic) = self.generic.take() {
            self.code = codes.code(generic).to_owned();
            self.status = codes.status(generic);
        }
        self
    }

    /// Whether the caller is at fault (4xx).
    #[must_use]
    pub fn is_client_fault(&self) -> bool {
        self.status.is_client_error()
    }
}

impl From<ParamError> for ServiceError {
    fn from(err: ParamError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound { .. } => Self::not_found(message),
            StoreError::AlreadyExists { .. } => Self::already_exists(message),
            StoreError::LockConflict { .. } => Self::lock_conflict(message),
            StoreError::InvalidToken(_) => Self::validation(message),
        }
    }
}
