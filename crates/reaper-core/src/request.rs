//! Access requests and the `type:id` entity reference format.

use serde::{Deserialize, Serialize};

use crate::error::{ReaperError, Result};

/// The literal subject that bypasses all validation and policy evaluation.
pub const SYSTEM_SUBJECT: &str = "system";

/// An immutable request to perform `action` on `resource` as `subject`.
///
/// Construct via [`AccessRequest::new`], which validates the fields except
/// for the literal `system` subject. There is no public constructor that
/// skips validation — callers that need the bypass path must literally
/// pass `"system"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub subject: String,
    pub action: String,
    pub resource: String,
}

impl AccessRequest {
    /// Build a validated request.
    ///
    /// The `system` subject is exempt from all validation (including the
    /// `type:id` shape and emptiness checks on `action`/`resource`) since it
    /// short-circuits the pipeline before those fields are ever read.
    ///
    /// # Errors
    ///
    /// Returns [`ReaperError::InvalidRequest`] for empty/whitespace-only
    /// fields, or [`ReaperError::InvalidEntityRef`] if `subject` is not the
    /// literal `system` and is not a well-formed `type:id` ref.
    pub fn new(
        subject: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Result<Self> {
        let subject = subject.into();
        let action = action.into();
        let resource = resource.into();

        if subject == SYSTEM_SUBJECT {
            return Ok(Self {
                subject,
                action,
                resource,
            });
        }

        validate_non_blank("subject", &subject)?;
        validate_non_blank("action", &action)?;
        validate_non_blank("resource", &resource)?;
        validate_entity_ref(&subject)?;

        Ok(Self {
            subject,
            action,
            resource,
        })
    }

    /// True iff the subject is the literal bypass subject.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.subject == SYSTEM_SUBJECT
    }

    /// True iff the subject begins with the `session:` namespace.
    #[must_use]
    pub fn is_session_subject(&self) -> bool {
        self.subject.starts_with("session:")
    }
}

fn validate_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ReaperError::InvalidRequest {
            reason: format!("{field} must not be empty or whitespace"),
        });
    }
    Ok(())
}

/// Split a `type:id` ref on the first colon; extra colons belong to `id`.
///
/// Returns `None` if there is no colon, or either half is empty.
#[must_use]
pub fn split_entity_ref(entity_ref: &str) -> Option<(&str, &str)> {
    let (ty, id) = entity_ref.split_once(':')?;
    if ty.is_empty() || id.is_empty() {
        return None;
    }
    Some((ty, id))
}

fn validate_entity_ref(entity_ref: &str) -> Result<()> {
    if split_entity_ref(entity_ref).is_none() {
        return Err(ReaperError::InvalidEntityRef {
            entity_ref: entity_ref.to_string(),
        });
    }
    Ok(())
}

/// Extract the `type` half of a `type:id` ref, or `""` if malformed.
///
/// Used only for target matching — never for validation, which is stricter
/// and lives in [`validate_entity_ref`].
#[must_use]
pub fn entity_type(entity_ref: &str) -> &str {
    split_entity_ref(entity_ref).map_or("", |(ty, _)| ty)
}
