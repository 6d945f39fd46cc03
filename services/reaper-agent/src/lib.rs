//! # Reaper Agent
//!
//! High-performance policy enforcement service. `main.rs` is a thin
//! bootstrap shell around the pieces exposed here so integration tests
//! can drive the router directly instead of over a real socket.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use message_queue::{AuditLogger, RecordingAuditWriter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use policy_engine::{Cache, Engine, InMemoryPolicyStore, JsonCompiler, Resolver};
use reaper_core::{endpoints, AccessRequest, AuditMode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Environment-driven bootstrap configuration, fail-closed on malformed
/// (rather than merely absent) values.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bind_addr: SocketAddr,
    pub audit_mode: AuditMode,
    pub audit_wal_path: std::path::PathBuf,
    pub cache_stale_after: Duration,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_parsed("REAPER_AGENT_BIND_ADDR", "0.0.0.0:8080")?;
        let audit_mode = match std::env::var("REAPER_AUDIT_MODE") {
            Ok(raw) => parse_audit_mode(&raw)?,
            Err(std::env::VarError::NotPresent) => AuditMode::DenialsOnly,
            Err(err) => anyhow::bail!("REAPER_AUDIT_MODE is not valid unicode: {err}"),
        };
        let audit_wal_path = std::env::var("REAPER_AUDIT_WAL_PATH")
            .unwrap_or_else(|_| "reaper-agent-audit.wal".to_string())
            .into();
        let cache_stale_after_secs: u64 = env_parsed("REAPER_CACHE_STALE_AFTER_SECS", "30")?;
        if cache_stale_after_secs == 0 {
            anyhow::bail!("REAPER_CACHE_STALE_AFTER_SECS must be > 0");
        }

        Ok(Self {
            bind_addr,
            audit_mode,
            audit_wal_path,
            cache_stale_after: Duration::from_secs(cache_stale_after_secs),
        })
    }
}

fn env_parsed<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|err| anyhow::anyhow!("{key} is not valid ({raw:?}): {err}"))
}

fn parse_audit_mode(raw: &str) -> anyhow::Result<AuditMode> {
    match raw {
        "minimal" => Ok(AuditMode::Minimal),
        "denials_only" => Ok(AuditMode::DenialsOnly),
        "all" => Ok(AuditMode::All),
        other => anyhow::bail!("REAPER_AUDIT_MODE must be one of minimal|denials_only|all, got {other:?}"),
    }
}

#[derive(Clone)]
pub struct AgentState {
    pub engine: Arc<Engine>,
    pub store: Arc<InMemoryPolicyStore>,
    pub prometheus: PrometheusHandle,
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    subject: String,
    action: String,
    resource: String,
}

#[derive(Debug, Serialize)]
struct EvaluateResponse {
    allowed: bool,
    effect: reaper_core::Effect,
    reason: String,
    policy_id: String,
    evaluation_time_microseconds: u64,
}

/// A global Prometheus recorder can be installed at most once per
/// process; tests that bootstrap several [`AgentState`]s in the same
/// binary share a single handle instead of panicking on the second
/// install.
static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

fn shared_prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS.get() {
        return Ok(handle.clone());
    }
    // `install_recorder` fails if some other crate in this process already
    // set the global recorder (e.g. `reaper-platform` bootstrapped first in
    // the same test binary). Fall back to an unregistered local recorder
    // rather than treating that as a bootstrap failure.
    let handle = PrometheusBuilder::new().install_recorder().unwrap_or_else(|_| {
        warn!("global prometheus recorder already installed, rendering from a local recorder");
        PrometheusBuilder::new().build_recorder().handle()
    });
    Ok(PROMETHEUS.get_or_init(|| handle).clone())
}

/// Build the agent's state: compiled-policy cache seeded from an empty
/// in-memory store, a provider-less resolver, and an audit logger in
/// `config.audit_mode`. Replays any pending WAL entries before returning.
pub async fn bootstrap(config: &AgentConfig) -> anyhow::Result<Arc<AgentState>> {
    let prometheus = shared_prometheus_handle()?;

    let store = Arc::new(InMemoryPolicyStore::new());
    let cache = Arc::new(Cache::new(store.clone(), Arc::new(JsonCompiler::new()), config.cache_stale_after));
    if let Err(err) = cache.reload().await {
        warn!(error = %err, "initial policy cache reload failed, starting with an empty snapshot");
    }

    let resolver = Arc::new(Resolver::new(Vec::new(), Vec::new()));
    let audit = Arc::new(AuditLogger::new(
        config.audit_mode,
        Arc::new(RecordingAuditWriter::new()),
        config.audit_wal_path.clone(),
    ));
    if let Err(err) = audit.replay_wal().await {
        warn!(error = %err, "audit wal replay on startup failed");
    }

    let engine = Arc::new(Engine::new(cache, resolver, None, audit));
    Ok(Arc::new(AgentState { engine, store, prometheus }))
}

/// Build the axum router against `state`. Shared between `main` (served
/// over a real socket) and integration tests (driven in-process via
/// `tower::ServiceExt::oneshot`).
#[must_use]
pub fn build_router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::METRICS, get(metrics))
        .route(endpoints::API_V1_EVALUATE, post(evaluate_policy))
        .with_state(state)
}

#[instrument]
async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "reaper-agent",
        "version": reaper_core::VERSION
    })))
}

#[instrument(skip(state))]
async fn metrics(State(state): State<Arc<AgentState>>) -> Response {
    state.prometheus.render().into_response()
}

#[instrument(skip(state))]
async fn evaluate_policy(
    State(state): State<Arc<AgentState>>,
    Json(payload): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, StatusCode> {
    let request = AccessRequest::new(payload.subject, payload.action, payload.resource).map_err(|err| {
        warn!(error = %err, "rejected malformed evaluation request");
        StatusCode::BAD_REQUEST
    })?;

    let started = std::time::Instant::now();
    let decision = state
        .engine
        .evaluate(request, &CancellationToken::new())
        .await
        .map_err(|err| {
            warn!(error = %err, "evaluation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(EvaluateResponse {
        allowed: decision.is_allowed(),
        effect: decision.effect,
        reason: decision.reason,
        policy_id: decision.policy_id,
        evaluation_time_microseconds: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
    }))
}
