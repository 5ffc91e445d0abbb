//! Error types for the request desk

use std::fmt;
use thiserror::Error;

/// Result type for request desk operations
pub type Result<T> = std::result::Result<T, SdkError>;

/// Client-side pre-flight failures. These never reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    /// Password and confirmation differ
    PasswordMismatch,
    /// Page numbers are 1-indexed
    InvalidPage(u32),
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::PasswordMismatch => {
                write!(f, "password and confirmation do not match")
            }
            ValidationReason::InvalidPage(page) => write!(f, "invalid page {}", page),
        }
    }
}

/// Why an authentication attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Wrong email or password
    InvalidCredentials,
    /// The server rejected the submitted fields
    ValidationFailed,
    /// The shared guest account could not be issued
    GuestUnavailable,
    /// The server accepted the login but delivered no credential
    MissingCredential,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::InvalidCredentials => write!(f, "invalid credentials"),
            AuthFailure::ValidationFailed => write!(f, "validation failed"),
            AuthFailure::GuestUnavailable => write!(f, "guest unavailable"),
            AuthFailure::MissingCredential => write!(f, "missing credential"),
        }
    }
}

/// Which mutation a user-facing message is being assembled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    /// Generic message shown when the server gave no field errors
    pub fn fallback_message(&self) -> &'static str {
        match self {
            MutationKind::Create => "Failed to create request.",
            MutationKind::Update => "Failed to update request.",
            MutationKind::Delete => "Failed to delete request.",
        }
    }
}

/// Request desk error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdkError {
    /// Client-side pre-flight check failed
    #[error("Validation error: {0}")]
    Validation(ValidationReason),

    /// Login, signup or guest login refused
    #[error("Authentication error ({reason}): {detail}")]
    Authentication { reason: AuthFailure, detail: String },

    /// Caller lacks rights for the attempted mutation
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Resource id could not be resolved
    #[error("Not found: {0}")]
    NotFound(String),

    /// Structured field errors returned by the server
    #[error("Server validation failed: {}", .field_errors.join(", "))]
    ServerValidation { field_errors: Vec<String> },

    /// Network, timeout or unparseable response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Collection fetch failed; previous items stay visible
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

impl SdkError {
    /// Human-readable message for a failed mutation.
    ///
    /// Field errors are joined when the server sent any; otherwise the
    /// generic per-operation message is used.
    pub fn user_message(&self, kind: MutationKind) -> String {
        match self {
            SdkError::ServerValidation { field_errors } if !field_errors.is_empty() => {
                field_errors.join(", ")
            }
            _ => kind.fallback_message().to_string(),
        }
    }

    /// Whether this error means the resource is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, SdkError::NotFound(_))
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Transport(format!("unparseable response: {}", err))
    }
}
