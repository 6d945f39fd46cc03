//! The evaluation engine: the single entry point that walks a request
//! through validation, session rewriting, attribute resolution, target
//! filtering, condition evaluation, and deny-overrides combination, then
//! routes the result to the audit logger and metrics.

use std::sync::Arc;
use std::time::Instant;

use message_queue::AuditLogger;
use metrics::MetricsRecorder;
use reaper_core::audit::Entry as AuditEntry;
use reaper_core::error::{ReaperError, ERROR_CODE_SESSION_INVALID};
use reaper_core::{entity_type, AccessRequest, Decision, Effect, PolicyEffect, PolicyMatch, Result, SessionResolver};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::Cache;
use crate::evaluator;
use crate::resolver::Resolver;

/// Wires the attribute resolver, compiled-policy cache, condition
/// evaluator, and audit logger behind one `evaluate` call.
#[derive(Debug)]
pub struct Engine {
    cache: Arc<Cache>,
    resolver: Arc<Resolver>,
    session_resolver: Option<Arc<dyn SessionResolver>>,
    audit: Arc<AuditLogger>,
    metrics: MetricsRecorder,
}

impl Engine {
    #[must_use]
    pub fn new(
        cache: Arc<Cache>,
        resolver: Arc<Resolver>,
        session_resolver: Option<Arc<dyn SessionResolver>>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            cache,
            resolver,
            session_resolver,
            audit,
            metrics: MetricsRecorder::new(),
        }
    }

    /// Evaluate `req` and return the final [`Decision`].
    ///
    /// Every return path — including early exits for system bypass, an
    /// invalid session, or a stale cache — passes through the same
    /// audit-and-metrics tail, so no decision ever skips being recorded.
    ///
    /// # Errors
    ///
    /// Returns an error only for a cancelled evaluation context or a
    /// [`Decision`] invariant violation (a programmer error). Every
    /// authorization outcome, including infrastructure failures, comes
    /// back as a `Decision`, not an `Err`.
    pub async fn evaluate(&self, req: AccessRequest, cancel: &CancellationToken) -> Result<Decision> {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return Err(ReaperError::Cancelled);
        }

        let (decision, effective_subject) = self.evaluate_inner(req.clone()).await?;
        decision.validate()?;

        let elapsed = started.elapsed();
        self.metrics.record_evaluation(&decision.reason, decision.effect);
        self.metrics.record_evaluate_duration(elapsed);

        let winning_policy_name = decision
            .policies
            .iter()
            .find(|m| m.policy_id == decision.policy_id)
            .map(|m| m.policy_name.clone())
            .unwrap_or_default();

        let attributes = decision
            .attributes
            .as_ref()
            .map(reaper_core::attributes::AttributeBags::flatten)
            .unwrap_or_default();

        self.audit
            .log(AuditEntry {
                subject: effective_subject,
                action: req.action.clone(),
                resource: req.resource.clone(),
                effect: decision.effect,
                policy_id: decision.policy_id.clone(),
                policy_name: winning_policy_name,
                attributes,
                duration_us: i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX),
                timestamp: chrono::Utc::now(),
            })
            .await;

        Ok(decision)
    }

    /// Runs the pipeline and returns the decision alongside the subject
    /// actually evaluated against — the session-rewritten `character:...`
    /// ref when rewriting succeeded, or the request's original subject
    /// otherwise. Callers audit against this, never `req.subject`, so a
    /// `session:` subject never ends up in the audit trail (spec §4.5
    /// step 11, scenario S3).
    async fn evaluate_inner(&self, req: AccessRequest) -> Result<(Decision, String)> {
        if req.is_system() {
            return Ok((Decision::new(Effect::SystemBypass, "system bypass", ""), req.subject));
        }

        let effective_subject = match self.rewrite_session(&req).await {
            RewriteOutcome::Subject(subject) => subject,
            RewriteOutcome::Decision(decision) => return Ok((decision, req.subject)),
        };

        let mut effective_req = req;
        effective_req.subject = effective_subject.clone();

        let bags = self.resolver.resolve(&effective_req).await;

        if self.cache.is_stale() {
            return Ok((
                Decision::new(Effect::DefaultDeny, "policy cache stale", "infra:cache-stale")
                    .with_attributes(bags),
                effective_subject,
            ));
        }

        let snapshot = self.cache.snapshot();
        let principal_type = entity_type(&effective_req.subject);
        let resource_type = entity_type(&effective_req.resource);

        let mut matches = Vec::new();
        for entry in snapshot.policies() {
            let target = &entry.policy.target;
            if !target.matches_principal(principal_type)
                || !target.matches_action(&effective_req.action)
                || !target.matches_resource(&effective_req.resource, resource_type)
            {
                continue;
            }

            let conditions_met = match &entry.policy.conditions {
                Some(condition) => evaluator::evaluate(condition, &bags, &entry.policy.glob_cache),
                None => true,
            };

            matches.push(PolicyMatch {
                policy_id: entry.id.to_string(),
                policy_name: entry.name.clone(),
                effect: entry.policy.effect.as_effect(),
                conditions_met,
            });
        }

        if matches.is_empty() {
            return Ok((
                Decision::new(Effect::DefaultDeny, "no applicable policies", "").with_attributes(bags),
                effective_subject,
            ));
        }

        let decision = combine(&matches).with_policies(matches).with_attributes(bags);
        Ok((decision, effective_subject))
    }

    /// Rewrite a `session:` subject to the entity ref it authenticates
    /// as. Subjects that are not session-prefixed pass through
    /// unchanged.
    async fn rewrite_session(&self, req: &AccessRequest) -> RewriteOutcome {
        if !req.is_session_subject() {
            return RewriteOutcome::Subject(req.subject.clone());
        }

        let Some(resolver) = &self.session_resolver else {
            warn!("session subject present but no session resolver configured");
            return RewriteOutcome::Decision(Decision::new(
                Effect::DefaultDeny,
                "no session resolver configured",
                "infra:no-session-resolver",
            ));
        };

        let session_id = req.subject.strip_prefix("session:").unwrap_or(&req.subject);
        match resolver.resolve(session_id).await {
            Ok(entity_ref) => RewriteOutcome::Subject(entity_ref),
            Err(err) if err.code() == Some(ERROR_CODE_SESSION_INVALID) => RewriteOutcome::Decision(
                Decision::new(Effect::DefaultDeny, "session invalid", "infra:session-invalid"),
            ),
            Err(err) => {
                warn!(error = %err, "session store failure during rewrite");
                RewriteOutcome::Decision(Decision::new(
                    Effect::DefaultDeny,
                    "session store error",
                    "infra:session-store-error",
                ))
            }
        }
    }
}

enum RewriteOutcome {
    Subject(String),
    Decision(Decision),
}

/// Deny-overrides combination over the per-policy matches, in snapshot
/// order: the first satisfied `Forbid` wins outright; failing that, the
/// first satisfied `Permit` wins; failing that, default deny.
fn combine(matches: &[PolicyMatch]) -> Decision {
    if let Some(forbid) = matches
        .iter()
        .find(|m| m.conditions_met && m.effect == PolicyEffect::Forbid.as_effect())
    {
        return Decision::new(Effect::Deny, "forbid policy satisfied", forbid.policy_id.clone());
    }
    if let Some(permit) = matches
        .iter()
        .find(|m| m.conditions_met && m.effect == PolicyEffect::Permit.as_effect())
    {
        return Decision::new(Effect::Allow, "permit policy satisfied", permit.policy_id.clone());
    }
    Decision::new(Effect::DefaultDeny, "no policies satisfied", "")
}
