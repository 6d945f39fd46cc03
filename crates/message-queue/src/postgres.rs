//! Reference [`AuditWriter`] backed by Postgres, batching async writes
//! in transactions. Gated behind the `postgres-audit` feature so the
//! default build carries no SQL driver — the relational store itself
//! stays an external collaborator; this is only the glue satisfying
//! [`AuditWriter`] against it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reaper_core::audit::{AuditWriter, Entry};
use reaper_core::error::{ReaperError, Result};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Default batch size / flush period from spec §4.6.
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(1);

struct BatchState {
    pending: Vec<Entry>,
}

/// Batches `write_async` calls into a shared buffer, flushed either when
/// `batch_size` is reached or `flush_period` elapses, whichever comes
/// first. A batch that fails to commit is dropped wholesale — per spec,
/// individual row retry is not required.
pub struct BatchingPostgresAuditWriter {
    pool: PgPool,
    batch_size: usize,
    state: Arc<Mutex<BatchState>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BatchingPostgresAuditWriter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_batch_settings(pool, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_PERIOD)
    }

    pub fn with_batch_settings(pool: PgPool, batch_size: usize, flush_period: Duration) -> Self {
        let state = Arc::new(Mutex::new(BatchState { pending: Vec::new() }));
        let flusher_state = state.clone();
        let flusher_pool = pool.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_period);
            loop {
                ticker.tick().await;
                flush(&flusher_pool, &flusher_state).await;
            }
        });
        Self {
            pool,
            batch_size,
            state,
            flusher: Mutex::new(Some(handle)),
        }
    }

    async fn insert_row(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, entry: &Entry) -> sqlx::Result<()> {
        let attributes_json = serde_json::to_value(&entry.attributes).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            "INSERT INTO audit_log (subject, action, resource, effect, policy_id, policy_name, attributes, duration_us, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&entry.subject)
        .bind(&entry.action)
        .bind(format!("{:?}", entry.effect))
        .bind(&entry.policy_id)
        .bind(&entry.policy_name)
        .bind(attributes_json)
        .bind(entry.duration_us)
        .bind(entry.timestamp)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }
}

async fn flush(pool: &PgPool, state: &Arc<Mutex<BatchState>>) {
    let batch = {
        let mut guard = state.lock().await;
        if guard.pending.is_empty() {
            return;
        }
        std::mem::take(&mut guard.pending)
    };
    if let Err(err) = commit_batch(pool, &batch).await {
        error!(error = %err, batch_len = batch.len(), "audit batch commit failed, dropping batch");
    }
}

async fn commit_batch(pool: &PgPool, batch: &[Entry]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for entry in batch {
        BatchingPostgresAuditWriter::insert_row(&mut tx, entry).await?;
    }
    tx.commit().await
}

#[async_trait]
impl AuditWriter for BatchingPostgresAuditWriter {
    async fn write_sync(&self, entry: &Entry) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ReaperError::AuditError { reason: e.to_string() })?;
        Self::insert_row(&mut tx, entry)
            .await
            .map_err(|e| ReaperError::AuditError { reason: e.to_string() })?;
        tx.commit()
            .await
            .map_err(|e| ReaperError::AuditError { reason: e.to_string() })?;
        Ok(())
    }

    async fn write_async(&self, entry: Entry) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.pending.push(entry);
        let should_flush = guard.pending.len() >= self.batch_size;
        drop(guard);
        if should_flush {
            flush(&self.pool, &self.state).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.flusher.lock().await.take() {
            handle.abort();
        }
        flush(&self.pool, &self.state).await;
        Ok(())
    }
}

impl std::fmt::Debug for BatchingPostgresAuditWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingPostgresAuditWriter")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
