//! Error taxonomy for the vault.
//!
//! Every tool returns a single JSON object; on failure that object is
//! `{"status": "error", "kind": ..., "message": ..., "retryable": ...}`.
//! The variants below are the complete set of `kind` values. Only
//! backend transport failures and embedder failures are retryable;
//! everything else is a contract violation or an operator-facing
//! integrity problem.

use serde_json::{json, Value};
use thiserror::Error;

/// Service-wide error type.
///
/// | Variant | Retryable | Meaning |
/// |---------|-----------|---------|
/// | `InvalidInput` | no | Caller-visible contract violation (missing field, malformed filter, value out of range) |
/// | `InvalidMetadata` | no | Envelope failed builder validation |
/// | `IndexRequired` | no | Filter references a payload path with no index |
/// | `NotFound` | no | Target record does not exist |
/// | `Conflict` | no | Duplicate under import policy `error` |
/// | `BackendUnavailable` | yes | Vector store transport or 5xx error |
/// | `EmbeddingFailure` | yes | Embedder error |
/// | `IntegrityMismatch` | no | Audit or restore found a checksum/hash mismatch |
/// | `Internal` | no | Unclassified bug |
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("index required: {0}")]
    IndexRequired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Taxonomy name as it appears in the `kind` field of error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::InvalidInput(_) => "InvalidInput",
            VaultError::InvalidMetadata(_) => "InvalidMetadata",
            VaultError::IndexRequired(_) => "IndexRequired",
            VaultError::NotFound(_) => "NotFound",
            VaultError::Conflict(_) => "Conflict",
            VaultError::BackendUnavailable(_) => "BackendUnavailable",
            VaultError::EmbeddingFailure(_) => "EmbeddingFailure",
            VaultError::IntegrityMismatch(_) => "IntegrityMismatch",
            VaultError::Internal(_) => "Internal",
        }
    }

    /// Whether the caller (or an internal bounded retry) may retry the
    /// operation.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            VaultError::BackendUnavailable(_) | VaultError::EmbeddingFailure(_)
        )
    }

    /// Render the error as the tool-surface JSON object.
    pub fn to_response(&self) -> Value {
        json!({
            "status": "error",
            "kind": self.kind(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;
