//! Retention configuration and the partition-management contract the
//! retention worker drives each cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Retention windows and the cadence the worker runs on.
///
/// Defaults match spec §3: denials kept 90 days, allows 7 days, purge
/// cycle every 24 hours.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(with = "duration_secs")]
pub struct RetentionConfig {
    pub retain_denials: Duration,
    pub retain_allows: Duration,
    pub purge_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retain_denials: Duration::from_secs(90 * 24 * 3600),
            retain_allows: Duration::from_secs(7 * 24 * 3600),
            purge_interval: Duration::from_secs(24 * 3600),
        }
    }
}

/// Grace period between detaching an expired denial partition and
/// dropping it outright. Hard-coded per spec §9's open question — the
/// spec leaves this unconfigurable by design.
pub const DETACH_DROP_GRACE: Duration = Duration::from_secs(7 * 24 * 3600);

/// The outcome of one retention cycle. All four operations are attempted
/// regardless of earlier failures; `errors` accumulates whatever went
/// wrong so the worker can report a joined error without stopping the
/// cycle short.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionCycleReport {
    pub partitions_ensured: bool,
    pub allows_purged: u64,
    pub partitions_detached: Vec<String>,
    pub partitions_dropped: Vec<String>,
    pub errors: Vec<String>,
}

impl RetentionCycleReport {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The partition lifecycle contract the retention worker drives.
///
/// Implemented against the relational store by an external collaborator;
/// this crate defines only the shape. `message-queue` ships an
/// in-memory implementation for tests.
#[async_trait]
pub trait PartitionManager: Send + Sync + std::fmt::Debug {
    /// Ensure monthly partitions exist for the current month plus
    /// `months` future months. Must be idempotent: repeated calls create
    /// no duplicates and raise no errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store could not be reached or
    /// a partition could not be created.
    async fn ensure_partitions(&self, months: u32) -> Result<()>;

    /// Delete allow rows older than `older_than`. Returns the number of
    /// rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge could not complete.
    async fn purge_expired_allows(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Detach (but do not drop) denial partitions older than
    /// `older_than`. Returns the names of the partitions detached.
    ///
    /// # Errors
    ///
    /// Returns an error if detachment could not complete.
    async fn detach_expired_partitions(&self, older_than: DateTime<Utc>) -> Result<Vec<String>>;

    /// Drop partitions that were detached more than `grace` ago. Returns
    /// the names of the partitions dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a drop could not complete.
    async fn drop_detached_partitions(&self, grace: Duration) -> Result<Vec<String>>;

    /// Cheap liveness check against the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn health_check(&self) -> Result<()>;
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Wire {
        retain_denials_secs: u64,
        retain_allows_secs: u64,
        purge_interval_secs: u64,
    }

    pub fn serialize<S: Serializer>(config: &super::RetentionConfig, s: S) -> Result<S::Ok, S::Error> {
        Wire {
            retain_denials_secs: config.retain_denials.as_secs(),
            retain_allows_secs: config.retain_allows.as_secs(),
            purge_interval_secs: config.purge_interval.as_secs(),
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<super::RetentionConfig, D::Error> {
        let wire = Wire::deserialize(d)?;
        Ok(super::RetentionConfig {
            retain_denials: Duration::from_secs(wire.retain_denials_secs),
            retain_allows: Duration::from_secs(wire.retain_allows_secs),
            purge_interval: Duration::from_secs(wire.purge_interval_secs),
        })
    }
}
