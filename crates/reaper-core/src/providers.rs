//! Pluggable attribute providers, fanned out over per-namespace and
//! per-entity-root concurrently by the attribute resolver.

use async_trait::async_trait;

use crate::attributes::AttrValue;
use crate::error::Result;

/// Supplies attributes for one namespace of one entity root (subject or
/// resource), e.g. the `character` namespace under `principal`.
///
/// A provider error is never fatal to the overall resolution: the
/// resolver logs it and proceeds as though the namespace contributed no
/// attributes, so a single flaky provider degrades conditions that
/// reference it to `has` returning false rather than failing the whole
/// request.
#[async_trait]
pub trait AttributeProvider: Send + Sync + std::fmt::Debug {
    /// The namespace this provider populates, e.g. `"character"`.
    fn namespace(&self) -> &str;

    /// Resolve the attributes this provider contributes for `entity_ref`
    /// (a `type:id` string).
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's backing source is unreachable
    /// or `entity_ref` cannot be resolved. Callers treat this as a
    /// non-fatal, per-namespace absence — see the trait documentation.
    async fn attributes_for(
        &self,
        entity_ref: &str,
    ) -> Result<std::collections::HashMap<String, AttrValue>>;
}

/// Supplies environment attributes, which are not tied to a specific
/// subject or resource (time of day, server region, feature flags).
#[async_trait]
pub trait EnvironmentProvider: Send + Sync + std::fmt::Debug {
    fn namespace(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the environment source is unreachable. Treated
    /// the same as an [`AttributeProvider`] failure: non-fatal, logged,
    /// namespace contributes nothing.
    async fn attributes(&self) -> Result<std::collections::HashMap<String, AttrValue>>;
}
