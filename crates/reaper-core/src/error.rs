//! Error types for the Reaper ABAC engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReaperError>;

/// Errors an `Evaluate` call or a supporting collaborator can return.
///
/// Per the error handling design, most authorization outcomes (including
/// infrastructure failures such as a stale cache or a dead session store)
/// are returned as a [`crate::Decision`], not an error. Variants here are
/// reserved for programmer errors and invalid input that must never reach
/// a caller as a silent deny.
#[derive(Error, Debug)]
pub enum ReaperError {
    #[error("Policy not found: {policy_id}")]
    PolicyNotFound { policy_id: String },

    #[error("Invalid policy definition: {reason}")]
    InvalidPolicy { reason: String },

    #[error("Policy compilation failed: {reason}")]
    CompileError { reason: String },

    #[error("Policy evaluation failed: {reason}")]
    EvaluationError { reason: String },

    /// A request field was empty or whitespace-only.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A subject or resource ref was not `type:id` with both halves non-empty.
    #[error("Invalid entity reference: {entity_ref}")]
    InvalidEntityRef { entity_ref: String },

    /// The evaluation context was cancelled before the pipeline could run.
    #[error("Evaluation cancelled")]
    Cancelled,

    /// A `Decision` failed its own invariant check. This is always a
    /// programmer error — it must never occur on a production code path.
    #[error("Decision invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("Session store error: {reason}")]
    SessionStoreError { reason: String },

    #[error("Session invalid")]
    SessionInvalid,

    #[error("Retention cycle failed: {0}")]
    RetentionError(String),

    #[error("Audit backend error: {reason}")]
    AuditError { reason: String },

    #[error("Serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Stable string tag carried by an error so layers can distinguish
/// infrastructure failures by code rather than by type identity.
///
/// Used by [`crate::session::SessionResolver`] implementations: the code
/// `SESSION_INVALID` denotes an authenticated-but-invalid session; any
/// other code (or none) is treated as a store failure.
pub const ERROR_CODE_SESSION_INVALID: &str = "SESSION_INVALID";

impl ReaperError {
    /// The stable string tag for this error, if it has one.
    ///
    /// Classification code (session rewriting, audit fallback) should
    /// branch on this, never on `matches!(err, ReaperError::Variant)` —
    /// the set of variants is expected to grow.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::SessionInvalid => Some(ERROR_CODE_SESSION_INVALID),
            _ => None,
        }
    }
}
