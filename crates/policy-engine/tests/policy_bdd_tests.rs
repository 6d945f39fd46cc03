//! BDD tests for the full evaluation pipeline (spec scenarios S1-S5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cucumber::{given, then, when, World};
use message_queue::{AuditLogger, RecordingAuditWriter};
use policy_engine::{Cache, Engine, InMemoryPolicyStore, JsonCompiler, Resolver};
use reaper_core::error::{ReaperError, Result};
use reaper_core::policy::RawPolicy;
use reaper_core::{AccessRequest, AttrValue, AttributeProvider, AuditMode, Decision, SessionResolver};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct FixedAttributeProvider {
    role: parking_lot::Mutex<Option<String>>,
    banned: parking_lot::Mutex<bool>,
    last_character_ref: parking_lot::Mutex<Option<String>>,
}

#[async_trait]
impl AttributeProvider for FixedAttributeProvider {
    fn namespace(&self) -> &str {
        "character"
    }

    async fn attributes_for(&self, entity_ref: &str) -> Result<HashMap<String, AttrValue>> {
        if reaper_core::entity_type(entity_ref) != "character" {
            return Ok(HashMap::new());
        }
        *self.last_character_ref.lock() = Some(entity_ref.to_string());
        let mut attrs = HashMap::new();
        if let Some(role) = self.role.lock().clone() {
            attrs.insert("role".to_string(), AttrValue::Text(role));
        }
        attrs.insert("banned".to_string(), AttrValue::Bool(*self.banned.lock()));
        Ok(attrs)
    }
}

#[derive(Debug)]
struct FixedSessionResolver {
    session_id: String,
    resolved_subject: String,
}

#[async_trait]
impl SessionResolver for FixedSessionResolver {
    async fn resolve(&self, session_id: &str) -> Result<String> {
        if session_id == self.session_id {
            Ok(self.resolved_subject.clone())
        } else {
            Err(ReaperError::SessionInvalid)
        }
    }
}

#[derive(Debug, World)]
#[world(init = Self::new)]
struct EvaluationWorld {
    engine: Option<Engine>,
    provider: Arc<FixedAttributeProvider>,
    decision: Option<Decision>,
}

impl EvaluationWorld {
    fn new() -> Self {
        Self {
            engine: None,
            provider: Arc::new(FixedAttributeProvider::default()),
            decision: None,
        }
    }
}

async fn build_engine(
    policies: Vec<(&str, &str, bool, serde_json::Value)>,
    session_resolver: Option<Arc<dyn SessionResolver>>,
    provider: Arc<FixedAttributeProvider>,
    reload: bool,
) -> Engine {
    let store = Arc::new(InMemoryPolicyStore::new());
    for (name, effect, enabled, conditions) in policies {
        let dsl_text = json!({
            "effect": effect,
            "target": {},
            "conditions": conditions,
        })
        .to_string();
        store.upsert(RawPolicy {
            id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            dsl_text,
            enabled,
        });
    }

    let cache = Arc::new(Cache::new(store, Arc::new(JsonCompiler::new()), Duration::from_secs(60)));
    if reload {
        cache.reload().await.unwrap();
    }

    let resolver = Arc::new(Resolver::new(vec![provider as Arc<dyn AttributeProvider>], vec![]));
    let audit = Arc::new(AuditLogger::new(
        AuditMode::All,
        Arc::new(RecordingAuditWriter::new()),
        std::env::temp_dir().join(format!("policy-bdd-{}.jsonl", uuid::Uuid::new_v4())),
    ));
    Engine::new(cache, resolver, session_resolver, audit)
}

#[given("an engine with no policies")]
async fn given_engine_no_policies(world: &mut EvaluationWorld) {
    world.engine = Some(build_engine(vec![], None, world.provider.clone(), true).await);
}

#[given("an engine whose cache has never been reloaded")]
async fn given_engine_never_reloaded(world: &mut EvaluationWorld) {
    world.engine = Some(build_engine(vec![], None, world.provider.clone(), false).await);
}

#[given("an engine with a permit policy for role {string} and a forbid policy for banned characters")]
async fn given_engine_permit_forbid(world: &mut EvaluationWorld, role: String) {
    let permit_conditions = json!({ "Compare": {
        "op": "Eq",
        "lhs": { "root": "principal", "namespace": "character", "key": "role" },
        "rhs": role,
    }});
    let forbid_conditions = json!({ "Compare": {
        "op": "Eq",
        "lhs": { "root": "principal", "namespace": "character", "key": "banned" },
        "rhs": true,
    }});
    world.engine = Some(
        build_engine(
            vec![
                ("permit-player", "permit", true, permit_conditions),
                ("forbid-banned", "forbid", true, forbid_conditions),
            ],
            None,
            world.provider.clone(),
            true,
        )
        .await,
    );
}

#[given("the subject {string} has role {string} and is banned")]
async fn given_subject_role_and_banned(world: &mut EvaluationWorld, _subject: String, role: String) {
    *world.provider.role.lock() = Some(role);
    *world.provider.banned.lock() = true;
}

#[given("an engine with a permit-all policy and a session resolver that maps {string} to {string}")]
async fn given_engine_with_session_resolver(world: &mut EvaluationWorld, session_id: String, resolved: String) {
    let resolver: Arc<dyn SessionResolver> = Arc::new(FixedSessionResolver {
        session_id,
        resolved_subject: resolved,
    });
    world.engine = Some(
        build_engine(
            vec![("permit-all", "permit", true, json!(null))],
            Some(resolver),
            world.provider.clone(),
            true,
        )
        .await,
    );
}

#[when("I evaluate subject {string}, action {string}, resource {string}")]
async fn when_evaluate(world: &mut EvaluationWorld, subject: String, action: String, resource: String) {
    let request = AccessRequest::new(subject, action, resource).unwrap();
    let decision = world
        .engine
        .as_ref()
        .unwrap()
        .evaluate(request, &CancellationToken::new())
        .await
        .unwrap();
    world.decision = Some(decision);
}

#[then("the effect should be {string}")]
async fn then_effect_should_be(world: &mut EvaluationWorld, effect: String) {
    let decision = world.decision.as_ref().unwrap();
    let actual = match decision.effect {
        reaper_core::Effect::Allow => "allow",
        reaper_core::Effect::Deny => "deny",
        reaper_core::Effect::DefaultDeny => "default_deny",
        reaper_core::Effect::SystemBypass => "system_bypass",
    };
    assert_eq!(actual, effect);
}

#[then("the reason should be {string}")]
async fn then_reason_should_be(world: &mut EvaluationWorld, reason: String) {
    assert_eq!(world.decision.as_ref().unwrap().reason, reason);
}

#[then("the decision should be allowed")]
async fn then_decision_allowed(world: &mut EvaluationWorld) {
    assert!(world.decision.as_ref().unwrap().is_allowed());
}

#[then("the decision should be an infra failure")]
async fn then_decision_infra_failure(world: &mut EvaluationWorld) {
    assert!(world.decision.as_ref().unwrap().is_infra_failure());
}

#[then("the winning policy should be the forbid policy")]
async fn then_winning_policy_is_forbid(world: &mut EvaluationWorld) {
    let decision = world.decision.as_ref().unwrap();
    let winner = decision
        .policies
        .iter()
        .find(|m| m.policy_id == decision.policy_id)
        .unwrap();
    assert_eq!(winner.policy_name, "forbid-banned");
}

#[then("the audited subject should be {string}")]
async fn then_audited_subject(world: &mut EvaluationWorld, expected: String) {
    assert!(world.decision.as_ref().unwrap().is_allowed());
    assert_eq!(world.provider.last_character_ref.lock().clone(), Some(expected));
}

#[tokio::main]
async fn main() {
    EvaluationWorld::run("tests/features").await;
}
