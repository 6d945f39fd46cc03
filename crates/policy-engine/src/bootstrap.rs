//! Minimal, genuinely runnable stand-ins for the two external
//! collaborators the cache needs — a policy store and a DSL compiler —
//! so the agent and platform binaries have something to evaluate
//! against out of the box.
//!
//! Neither is the relational store or DSL parser the specification
//! scopes out: [`InMemoryPolicyStore`] keeps raw policies in memory
//! (mirroring [`message_queue::InMemoryPartitionManager`]'s role as a
//! real, if non-durable, reference adapter) and [`JsonCompiler`] treats
//! `dsl_text` as a pre-lowered JSON encoding of a [`CompiledPolicy`]'s
//! public fields rather than implementing an actual grammar. A
//! deployment with a real store and compiler swaps these out behind the
//! same [`PolicyStore`]/[`PolicyCompiler`] traits.

use async_trait::async_trait;
use dashmap::DashMap;
use reaper_core::error::Result;
use reaper_core::policy::{CompileError, CompiledPolicy, PolicyCompiler, PolicyId, PolicyStore, RawPolicy, Target};
use reaper_core::{Condition, PolicyEffect};
use serde::Deserialize;

/// Raw policies held in memory, keyed by [`PolicyId`].
///
/// `list_enabled` is the only method the cache calls; `upsert`/`remove`/
/// `get`/`list` exist so an admin surface (e.g. `reaper-platform`'s
/// policy endpoints) can mutate the set between reloads.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<PolicyId, RawPolicy>,
}

impl InMemoryPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, policy: RawPolicy) {
        self.policies.insert(policy.id, policy);
    }

    #[must_use]
    pub fn remove(&self, id: PolicyId) -> Option<RawPolicy> {
        self.policies.remove(&id).map(|(_, policy)| policy)
    }

    #[must_use]
    pub fn get(&self, id: PolicyId) -> Option<RawPolicy> {
        self.policies.get(&id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<RawPolicy> {
        self.policies.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn list_enabled(&self) -> Result<Vec<RawPolicy>> {
        Ok(self.policies.iter().filter(|entry| entry.enabled).map(|entry| entry.value().clone()).collect())
    }
}

/// The wire shape [`JsonCompiler`] expects in `RawPolicy::dsl_text`: the
/// subset of [`CompiledPolicy`]'s fields a compiler would otherwise
/// produce from parsed DSL.
#[derive(Debug, Deserialize)]
struct PolicyDsl {
    effect: PolicyEffect,
    #[serde(default)]
    target: Target,
    #[serde(default)]
    conditions: Option<Condition>,
}

/// Compiles a policy's `dsl_text` as JSON rather than as authored DSL.
///
/// Stands in for the external grammar compiler so the bootstrap
/// binaries can evaluate real policies without one. `grammar_version`
/// is always `"json-1"`, which a real compiler would never emit — it
/// marks every policy compiled this way as having skipped the actual
/// grammar.
#[derive(Debug, Default)]
pub struct JsonCompiler;

impl JsonCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PolicyCompiler for JsonCompiler {
    fn compile(&self, raw: &RawPolicy) -> std::result::Result<CompiledPolicy, CompileError> {
        let dsl: PolicyDsl = serde_json::from_str(&raw.dsl_text).map_err(|err| CompileError {
            reason: format!("policy {} is not valid json-1 dsl: {err}", raw.id),
            warnings: Vec::new(),
        })?;

        let mut compiled = CompiledPolicy {
            grammar_version: "json-1".to_string(),
            effect: dsl.effect,
            target: dsl.target,
            conditions: dsl.conditions,
            glob_cache: std::collections::HashMap::new(),
            dsl_text: raw.dsl_text.clone(),
            compile_warnings: Vec::new(),
        };
        compiled.rebuild_glob_cache().map_err(|reason| CompileError {
            reason,
            warnings: Vec::new(),
        })?;
        Ok(compiled)
    }
}
