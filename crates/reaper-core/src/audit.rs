//! Audit entries and the mode-based sync/async routing table.
//!
//! This module owns only the data shape and the routing decision; the
//! journal, the buffered channel, and the reference writers live in
//! `message-queue`, which implements [`AuditWriter`] against them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::attributes::AttrValue;
use crate::decision::Effect;
use crate::error::Result;

/// How aggressively the logger persists decisions.
///
/// `Minimal` and `DenialsOnly` currently behave identically — both log
/// only the denial set synchronously — the distinction is expected to
/// diverge once operators can tune per-mode sampling, which is out of
/// scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    Minimal,
    DenialsOnly,
    All,
}

/// One audited decision, ready to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub subject: String,
    pub action: String,
    pub resource: String,
    pub effect: Effect,
    pub policy_id: String,
    pub policy_name: String,
    pub attributes: HashMap<String, AttrValue>,
    pub duration_us: i64,
    pub timestamp: DateTime<Utc>,
}

/// `(should_log, use_sync)` for `effect` under `mode`, per spec §4.6.
///
/// `deny`, `default_deny`, and `system_bypass` are always logged
/// synchronously. `allow` is logged only in [`AuditMode::All`], and
/// asynchronously.
#[must_use]
pub fn routing(mode: AuditMode, effect: Effect) -> (bool, bool) {
    match (mode, effect) {
        (_, Effect::Deny | Effect::DefaultDeny | Effect::SystemBypass) => (true, true),
        (AuditMode::All, Effect::Allow) => (true, false),
        (AuditMode::Minimal | AuditMode::DenialsOnly, Effect::Allow) => (false, false),
    }
}

/// The persistence backend an [`Entry`] is ultimately written through.
///
/// Implemented by an external relational store adapter (synchronous
/// writes) and, for async entries, by whatever batches writes on its own
/// schedule. `message-queue` ships reference implementations; this crate
/// only defines the contract the logger programs against.
#[async_trait]
pub trait AuditWriter: Send + Sync + std::fmt::Debug {
    /// Persist `entry` before returning. Used for the synchronous path
    /// (denials, bypasses) and for WAL replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the write could not be committed. Callers are
    /// expected to fall back to the journal on failure, never to retry
    /// here.
    async fn write_sync(&self, entry: &Entry) -> Result<()>;

    /// Enqueue `entry` for eventual persistence. Implementations may
    /// batch; the only hard requirement is that entries accepted here are
    /// not silently lost except under the documented drop-on-failure
    /// rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not even be accepted (the
    /// in-process channel upstream of this call already handles
    /// backpressure, so this is rare).
    async fn write_async(&self, entry: Entry) -> Result<()>;

    /// Flush and release any resources. Called once during shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if pending writes could not be flushed.
    async fn close(&self) -> Result<()>;
}
