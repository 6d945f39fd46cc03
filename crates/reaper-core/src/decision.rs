//! Decision values and the deny-overrides combination outcome.

use serde::{Deserialize, Serialize};

use crate::error::{ReaperError, Result};

/// The outcome of evaluating a request against a policy snapshot.
///
/// `DefaultDeny` is the zero value (fail-closed): any path that returns a
/// `Decision` without explicitly choosing an effect denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[default]
    DefaultDeny,
    Allow,
    Deny,
    SystemBypass,
}

impl Effect {
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::Allow | Self::SystemBypass)
    }
}

/// The authoring-side effect a compiled policy carries.
///
/// Maps onto [`Effect`] during combination: `Permit` -> `Allow`, `Forbid` ->
/// `Deny`. There is deliberately no `Unknown` variant that maps to
/// `DefaultDeny` at this layer — an unrecognized effect is a compile-time
/// concern for the (external) DSL compiler, not something this type models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    Permit,
    Forbid,
}

impl PolicyEffect {
    #[must_use]
    pub fn as_effect(self) -> Effect {
        match self {
            Self::Permit => Effect::Allow,
            Self::Forbid => Effect::Deny,
        }
    }
}

/// One candidate policy's outcome after target filtering and condition
/// evaluation, regardless of whether it went on to win the combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMatch {
    pub policy_id: String,
    pub policy_name: String,
    pub effect: Effect,
    pub conditions_met: bool,
}

/// The result of an `Evaluate` call.
///
/// `allowed` is derived, never set directly by callers outside this module
/// — it exists only so serialized decisions carry the boolean without
/// recomputing it, and [`Decision::validate`] is the single place that can
/// catch the two ever drifting apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    allowed: bool,
    pub effect: Effect,
    pub reason: String,
    pub policy_id: String,
    pub policies: Vec<PolicyMatch>,
    pub attributes: Option<crate::attributes::AttributeBags>,
}

impl Default for Decision {
    fn default() -> Self {
        Self::new(Effect::DefaultDeny, String::new(), String::new())
    }
}

impl Decision {
    /// Build a decision, deriving `allowed` from `effect`.
    #[must_use]
    pub fn new(effect: Effect, reason: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self {
            allowed: effect.is_allow(),
            effect,
            reason: reason.into(),
            policy_id: policy_id.into(),
            policies: Vec::new(),
            attributes: None,
        }
    }

    #[must_use]
    pub fn with_policies(mut self, policies: Vec<PolicyMatch>) -> Self {
        self.policies = policies;
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: crate::attributes::AttributeBags) -> Self {
        self.attributes = Some(attributes);
        self
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// True iff `policy_id` begins with `infra:` and carries a non-empty
    /// suffix. This is the canonical test for an infrastructure-caused
    /// deny (stale cache, session store failure, ...).
    #[must_use]
    pub fn is_infra_failure(&self) -> bool {
        self.policy_id
            .strip_prefix("infra:")
            .is_some_and(|suffix| !suffix.is_empty())
    }

    /// Check the `allowed == (effect ∈ {Allow, SystemBypass})` invariant.
    ///
    /// A violation can only happen if a caller mutates `allowed` through
    /// serde deserialization from an untrusted source, or a future change
    /// to this module breaks the invariant in `new`. It must never fire on
    /// a code path reachable from [`crate::request::AccessRequest`]-driven
    /// evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`ReaperError::InvariantViolation`] if `allowed` disagrees
    /// with `effect`.
    pub fn validate(&self) -> Result<()> {
        if self.allowed != self.effect.is_allow() {
            return Err(ReaperError::InvariantViolation {
                reason: format!(
                    "Decision.allowed={} but effect={:?}",
                    self.allowed, self.effect
                ),
            });
        }
        Ok(())
    }
}
