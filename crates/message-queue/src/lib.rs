//! # Message Queue
//!
//! The audit subsystem's plumbing: mode-based sync/async routing, the
//! WAL journal fallback, the bounded async channel, and the
//! notification listener's reconnecting consumption loop.
//!
//! Despite the crate name (kept from the workspace's original shape),
//! nothing here is a general-purpose message broker — it is the
//! audit-logging and change-notification machinery the evaluation
//! pipeline and the compiled-policy cache depend on.

pub mod audit;
pub mod listener;
pub mod partition;

#[cfg(feature = "postgres-audit")]
pub mod postgres;

pub use audit::{AsyncAuditChannel, AuditLogger, RecordingAuditWriter, WalJournal, DEFAULT_CHANNEL_CAPACITY};
pub use listener::run_reconnecting;
pub use partition::InMemoryPartitionManager;
