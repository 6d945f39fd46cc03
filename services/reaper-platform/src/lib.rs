//! # Reaper Platform
//!
//! Policy administration and retention operations: the control-plane
//! surface an operator (or `reaper-cli`) drives to author policies,
//! inspect partitions, and kick off a retention cycle on demand. The
//! agent evaluating requests is a separate process; this service never
//! evaluates, it only manages the compiled-policy cache's backing store.
//!
//! `main.rs` is a thin bootstrap shell around the pieces exposed here so
//! integration tests can drive the router directly.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use message_queue::InMemoryPartitionManager;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use policy_engine::{Cache, InMemoryPolicyStore, JsonCompiler, RetentionWorker};
use reaper_core::endpoints;
use reaper_core::policy::{PolicyId, RawPolicy};
use reaper_core::retention::{PartitionManager, RetentionConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{instrument, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PlatformConfig {
    pub bind_addr: SocketAddr,
    pub retention: RetentionConfig,
}

impl PlatformConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_parsed("REAPER_PLATFORM_BIND_ADDR", "0.0.0.0:8081")?;
        let retain_denials_secs: u64 = env_parsed("REAPER_RETAIN_DENIALS_SECS", "7776000")?;
        let retain_allows_secs: u64 = env_parsed("REAPER_RETAIN_ALLOWS_SECS", "604800")?;
        let purge_interval_secs: u64 = env_parsed("REAPER_PURGE_INTERVAL_SECS", "86400")?;
        if purge_interval_secs == 0 {
            anyhow::bail!("REAPER_PURGE_INTERVAL_SECS must be > 0");
        }

        Ok(Self {
            bind_addr,
            retention: RetentionConfig {
                retain_denials: Duration::from_secs(retain_denials_secs),
                retain_allows: Duration::from_secs(retain_allows_secs),
                purge_interval: Duration::from_secs(purge_interval_secs),
            },
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

#[derive(Clone)]
pub struct PlatformState {
    pub store: Arc<InMemoryPolicyStore>,
    pub cache: Arc<Cache>,
    pub partitions: Arc<InMemoryPartitionManager>,
    pub retention: Arc<RetentionWorker>,
    pub retention_config: RetentionConfig,
    pub prometheus: PrometheusHandle,
}

#[derive(Debug, Deserialize)]
struct CreatePolicyRequest {
    name: String,
    dsl_text: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct UpdatePolicyRequest {
    name: Option<String>,
    dsl_text: Option<String>,
    enabled: Option<bool>,
}

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

fn shared_prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS.get() {
        return Ok(handle.clone());
    }
    // `install_recorder` fails if some other crate in this process already
    // set the global recorder (e.g. `reaper-agent` bootstrapped first in
    // the same test binary). Fall back to an unregistered local recorder
    // rather than treating that as a bootstrap failure.
    let handle = PrometheusBuilder::new().install_recorder().unwrap_or_else(|_| {
        warn!("global prometheus recorder already installed, rendering from a local recorder");
        PrometheusBuilder::new().build_recorder().handle()
    });
    Ok(PROMETHEUS.get_or_init(|| handle).clone())
}

/// Build the platform's state: an empty in-memory policy store and
/// compiled-policy cache, an in-memory partition manager, and a
/// retention worker started on `config.retention.purge_interval`.
pub async fn bootstrap(config: &PlatformConfig) -> anyhow::Result<Arc<PlatformState>> {
    let prometheus = shared_prometheus_handle()?;

    let store = Arc::new(InMemoryPolicyStore::new());
    let cache = Arc::new(Cache::new(
        store.clone(),
        Arc::new(JsonCompiler::new()),
        policy_engine::DEFAULT_STALE_AFTER,
    ));
    if let Err(err) = cache.reload().await {
        warn!(error = %err, "initial policy cache reload failed, starting with an empty snapshot");
    }

    let partitions = Arc::new(InMemoryPartitionManager::new());
    let retention = Arc::new(RetentionWorker::new(
        Arc::clone(&partitions) as Arc<dyn PartitionManager>,
        config.retention,
    ));
    retention.start().await;

    Ok(Arc::new(PlatformState {
        store,
        cache,
        partitions,
        retention,
        retention_config: config.retention,
        prometheus,
    }))
}

#[must_use]
pub fn build_router(state: Arc<PlatformState>) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::METRICS, get(metrics))
        .route(endpoints::API_V1_POLICIES, get(list_policies).post(create_policy))
        .route(
            "/api/v1/policies/:id",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route(endpoints::API_V1_PARTITIONS, get(list_partitions))
        .route(endpoints::API_V1_RETENTION, get(retention_status).post(run_retention))
        .with_state(state)
}

#[instrument]
async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "reaper-platform",
        "version": reaper_core::VERSION
    })))
}

#[instrument(skip(state))]
async fn metrics(State(state): State<Arc<PlatformState>>) -> Response {
    state.prometheus.render().into_response()
}

#[instrument(skip(state))]
async fn list_policies(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    let policies = state.store.list();
    Json(json!({
        "policies": policies,
        "total": policies.len(),
    }))
}

#[instrument(skip(state))]
async fn get_policy(
    State(state): State<Arc<PlatformState>>,
    Path(id): Path<PolicyId>,
) -> Result<Json<RawPolicy>, StatusCode> {
    state.store.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[instrument(skip(state, payload))]
async fn create_policy(
    State(state): State<Arc<PlatformState>>,
    Json(payload): Json<CreatePolicyRequest>,
) -> Result<Json<Value>, StatusCode> {
    let policy = RawPolicy {
        id: uuid::Uuid::new_v4(),
        name: payload.name,
        dsl_text: payload.dsl_text,
        enabled: payload.enabled,
    };
    state.store.upsert(policy.clone());

    let reload_error = reload_and_log(&state).await;
    Ok(Json(json!({
        "policy": policy,
        "reload_error": reload_error,
    })))
}

#[instrument(skip(state, payload))]
async fn update_policy(
    State(state): State<Arc<PlatformState>>,
    Path(id): Path<PolicyId>,
    Json(payload): Json<UpdatePolicyRequest>,
) -> Result<Json<Value>, StatusCode> {
    let Some(mut policy) = state.store.get(id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    if let Some(name) = payload.name {
        policy.name = name;
    }
    if let Some(dsl_text) = payload.dsl_text {
        policy.dsl_text = dsl_text;
    }
    if let Some(enabled) = payload.enabled {
        policy.enabled = enabled;
    }
    state.store.upsert(policy.clone());

    let reload_error = reload_and_log(&state).await;
    Ok(Json(json!({
        "policy": policy,
        "reload_error": reload_error,
    })))
}

#[instrument(skip(state))]
async fn delete_policy(
    State(state): State<Arc<PlatformState>>,
    Path(id): Path<PolicyId>,
) -> Result<Json<Value>, StatusCode> {
    let Some(removed) = state.store.remove(id) else {
        return Err(StatusCode::NOT_FOUND);
    };

    let reload_error = reload_and_log(&state).await;
    Ok(Json(json!({
        "removed": removed,
        "reload_error": reload_error,
    })))
}

async fn reload_and_log(state: &PlatformState) -> Option<String> {
    match state.cache.reload().await {
        Ok(count) => {
            info!(policy_count = count, "policy cache reloaded after admin change");
            None
        }
        Err(err) => {
            warn!(error = %err, "policy cache reload failed after admin change");
            Some(err.to_string())
        }
    }
}

#[instrument(skip(state))]
async fn list_partitions(State(state): State<Arc<PlatformState>>) -> Result<Json<Value>, StatusCode> {
    state.partitions.health_check().await.map_err(|err| {
        warn!(error = %err, "partition manager health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok(Json(json!({
        "partitions": state.partitions.partition_names(),
        "dropped": state.partitions.dropped_names(),
    })))
}

#[derive(Debug, Serialize)]
struct RetentionStatusResponse {
    retain_denials_secs: u64,
    retain_allows_secs: u64,
    purge_interval_secs: u64,
}

#[instrument(skip(state))]
async fn retention_status(State(state): State<Arc<PlatformState>>) -> Json<RetentionStatusResponse> {
    Json(RetentionStatusResponse {
        retain_denials_secs: state.retention_config.retain_denials.as_secs(),
        retain_allows_secs: state.retention_config.retain_allows.as_secs(),
        purge_interval_secs: state.retention_config.purge_interval.as_secs(),
    })
}

#[instrument(skip(state))]
async fn run_retention(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    let report = policy_engine::run_retention_cycle(state.partitions.as_ref(), &state.retention_config).await;
    Json(json!(report))
}
