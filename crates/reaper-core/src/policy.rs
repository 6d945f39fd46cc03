//! Compiled policies and the immutable snapshot they live in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::GlobMatcher;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::PolicyEffect;

pub type PolicyId = Uuid;
pub type PolicyVersion = u64;

/// The four optional target constraints a compiled policy carries.
///
/// A present field is a constraint (AND with the others); an absent field
/// is a wildcard. `resource_exact` takes precedence over `resource_type`
/// when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    pub principal_type: Option<String>,
    /// Unique, order-preserving list of actions this policy applies to.
    pub action_list: Option<IndexSet<String>>,
    pub resource_type: Option<String>,
    pub resource_exact: Option<String>,
}

impl Target {
    #[must_use]
    pub fn matches_principal(&self, principal_type: &str) -> bool {
        self.principal_type
            .as_deref()
            .is_none_or(|expected| expected == principal_type)
    }

    #[must_use]
    pub fn matches_action(&self, action: &str) -> bool {
        self.action_list
            .as_ref()
            .is_none_or(|list| list.contains(action))
    }

    #[must_use]
    pub fn matches_resource(&self, resource: &str, resource_type: &str) -> bool {
        if let Some(exact) = &self.resource_exact {
            return exact == resource;
        }
        self.resource_type
            .as_deref()
            .is_none_or(|expected| expected == resource_type)
    }
}

/// A policy as produced by the (external) DSL compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub grammar_version: String,
    pub effect: PolicyEffect,
    pub target: Target,
    pub conditions: Option<crate::condition::Condition>,
    /// Pre-validated, pre-compiled `like` glob patterns keyed by the
    /// literal pattern text. Not serialized: `GlobMatcher` isn't
    /// `Serialize`, and a deserialized policy is expected to be
    /// re-registered through [`CompiledPolicy::rebuild_glob_cache`].
    #[serde(skip)]
    pub glob_cache: HashMap<String, GlobMatcher>,
    pub dsl_text: String,
    /// Non-fatal diagnostics from compilation (unknown attribute in a
    /// registered namespace, always-true block, unreachable conjunction).
    #[serde(default)]
    pub compile_warnings: Vec<String>,
}

impl CompiledPolicy {
    /// Rebuild `glob_cache` from the `pattern` strings appearing in
    /// `conditions`. Compilers should call this once after constructing a
    /// `CompiledPolicy`; it is exposed publicly so a deserialized policy
    /// (which always arrives with an empty cache) can be made usable
    /// again without invoking the external compiler.
    ///
    /// # Errors
    ///
    /// Returns an error string if any pattern fails to compile as a glob.
    pub fn rebuild_glob_cache(&mut self) -> Result<(), String> {
        self.glob_cache.clear();
        if let Some(cond) = self.conditions.clone() {
            collect_patterns(&cond, &mut self.glob_cache)?;
        }
        Ok(())
    }
}

fn collect_patterns(
    condition: &crate::condition::Condition,
    out: &mut HashMap<String, GlobMatcher>,
) -> Result<(), String> {
    use crate::condition::Condition as C;
    match condition {
        C::Like { pattern, .. } => {
            if !out.contains_key(pattern) {
                let matcher = globset::Glob::new(pattern)
                    .map_err(|e| format!("invalid glob pattern {pattern:?}: {e}"))?
                    .compile_matcher();
                out.insert(pattern.clone(), matcher);
            }
            Ok(())
        }
        C::Not(inner) => collect_patterns(inner, out),
        C::And(items) | C::Or(items) => {
            for item in items {
                collect_patterns(item, out)?;
            }
            Ok(())
        }
        C::If {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_patterns(condition, out)?;
            collect_patterns(then_branch, out)?;
            collect_patterns(else_branch, out)
        }
        C::Literal(_) | C::Compare { .. } | C::Has(_) | C::In { .. } => Ok(()),
    }
}

/// A policy as raw DSL text, prior to compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPolicy {
    pub id: PolicyId,
    pub name: String,
    pub dsl_text: String,
    pub enabled: bool,
}

/// Errors the (external) compiler can report. Warnings never block
/// compilation; only this error type does.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct CompileError {
    pub reason: String,
    pub warnings: Vec<String>,
}

/// The compiler contract the cache consumes. Implemented by an external
/// DSL parser/compiler — this crate defines only the shape it must
/// satisfy.
pub trait PolicyCompiler: Send + Sync + std::fmt::Debug {
    /// Compile one raw policy. Unknown attributes in the `action`
    /// namespace are a fatal [`CompileError`]; other diagnostics surface
    /// as `CompiledPolicy::compile_warnings` on success.
    fn compile(&self, raw: &RawPolicy) -> Result<CompiledPolicy, CompileError>;
}

/// The policy storage contract the cache consumes to fetch enabled
/// policies on reload. Implemented by an external relational store.
#[async_trait]
pub trait PolicyStore: Send + Sync + std::fmt::Debug {
    async fn list_enabled(&self) -> crate::error::Result<Vec<RawPolicy>>;
}

/// One compiled policy as it sits in a [`Snapshot`].
#[derive(Debug, Clone)]
pub struct PolicyEntry {
    pub id: PolicyId,
    pub name: String,
    pub policy: Arc<CompiledPolicy>,
}

/// The immutable, atomically-swappable view of all enabled policies.
///
/// Never mutated after construction — `Reload` builds a brand new
/// `Snapshot` and the cache swaps the whole handle, so any `Arc<Snapshot>`
/// a reader is holding stays internally consistent even while a reload is
/// in flight on another thread.
#[derive(Debug, Clone)]
pub struct Snapshot {
    policies: Arc<[PolicyEntry]>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    #[must_use]
    pub fn new(policies: Vec<PolicyEntry>, created_at: DateTime<Utc>) -> Self {
        Self {
            policies: Arc::from(policies),
            created_at,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), Utc::now())
    }

    /// Iterate policies in snapshot order — the order target filtering and
    /// deny-overrides combination both rely on for determinism.
    pub fn policies(&self) -> impl Iterator<Item = &PolicyEntry> {
        self.policies.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
