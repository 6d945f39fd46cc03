//! An in-memory [`PartitionManager`] test double standing in for the
//! relational store's partition lifecycle.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reaper_core::error::Result;
use reaper_core::retention::PartitionManager;

#[derive(Debug, Clone)]
struct DenialRow {
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct AllowRow {
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    partitions: HashSet<String>,
    detached: Vec<(String, DateTime<Utc>)>,
    dropped: Vec<String>,
    allows: Vec<AllowRow>,
    denials: Vec<DenialRow>,
}

/// In-memory stand-in for the relational partition manager. Exposes
/// `seed_allow`/`seed_denial` so tests can populate rows with specific
/// timestamps before exercising a retention cycle.
#[derive(Debug, Default)]
pub struct InMemoryPartitionManager {
    state: Mutex<State>,
}

impl InMemoryPartitionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_allow(&self, created_at: DateTime<Utc>) {
        self.state.lock().allows.push(AllowRow { created_at });
    }

    pub fn seed_denial(&self, created_at: DateTime<Utc>) {
        self.state.lock().denials.push(DenialRow { created_at });
    }

    #[must_use]
    pub fn partition_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().partitions.iter().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn dropped_names(&self) -> Vec<String> {
        self.state.lock().dropped.clone()
    }
}

fn partition_name(prefix: &str, month: DateTime<Utc>) -> String {
    use chrono::Datelike;
    format!("{prefix}_{:04}_{:02}", month.year(), month.month())
}

#[async_trait]
impl PartitionManager for InMemoryPartitionManager {
    async fn ensure_partitions(&self, months: u32) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock();
        for offset in 0..=months {
            let target = shift_months(now, offset as i32);
            state.partitions.insert(partition_name("audit", target));
        }
        Ok(())
    }

    async fn purge_expired_allows(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.allows.len();
        state.allows.retain(|row| row.created_at >= older_than);
        Ok((before - state.allows.len()) as u64)
    }

    async fn detach_expired_partitions(&self, older_than: DateTime<Utc>) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        let (expired, kept): (Vec<_>, Vec<_>) = state
            .denials
            .drain(..)
            .partition(|row| row.created_at < older_than);
        state.denials = kept;
        let now = Utc::now();
        let mut names = Vec::new();
        if !expired.is_empty() {
            let name = partition_name("audit_denials", older_than);
            state.detached.push((name.clone(), now));
            names.push(name);
        }
        Ok(names)
    }

    async fn drop_detached_partitions(&self, grace: Duration) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let mut dropped = Vec::new();
        state.detached.retain(|(name, detached_at)| {
            let age = now.signed_duration_since(*detached_at);
            let expired = age.to_std().map(|d| d >= grace).unwrap_or(false);
            if expired {
                dropped.push(name.clone());
            }
            !expired
        });
        state.dropped.extend(dropped.iter().cloned());
        Ok(dropped)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

fn shift_months(from: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    use chrono::Datelike;
    let total = from.year() * 12 + (from.month() as i32 - 1) + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) + 1;
    from.with_day(1)
        .unwrap()
        .with_year(year)
        .unwrap()
        .with_month(month as u32)
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn ensure_partitions_is_idempotent() {
        let manager = InMemoryPartitionManager::new();
        manager.ensure_partitions(3).await.unwrap();
        let first = manager.partition_names();
        manager.ensure_partitions(3).await.unwrap();
        let second = manager.partition_names();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[tokio::test]
    async fn purge_expired_allows_counts_deleted_rows() {
        let manager = InMemoryPartitionManager::new();
        let now = Utc::now();
        manager.seed_allow(now - ChronoDuration::days(10));
        manager.seed_allow(now);
        let deleted = manager
            .purge_expired_allows(now - ChronoDuration::days(7))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn detach_then_drop_after_grace() {
        let manager = InMemoryPartitionManager::new();
        let now = Utc::now();
        manager.seed_denial(now - ChronoDuration::days(100));
        let detached = manager
            .detach_expired_partitions(now - ChronoDuration::days(90))
            .await
            .unwrap();
        assert_eq!(detached.len(), 1);

        let dropped_immediately = manager
            .drop_detached_partitions(Duration::from_secs(7 * 24 * 3600))
            .await
            .unwrap();
        assert!(dropped_immediately.is_empty());

        let dropped = manager.drop_detached_partitions(Duration::ZERO).await.unwrap();
        assert_eq!(dropped, detached);
    }
}
