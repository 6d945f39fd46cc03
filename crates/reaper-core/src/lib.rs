//! # Reaper Core
//!
//! Domain types and trait contracts for the Reaper ABAC decision engine.
//!
//! This crate defines the vocabulary every other crate in the workspace
//! shares: the request/decision data model, the compiled-policy and
//! snapshot types, the audit entry shape, and the trait contracts
//! (attribute providers, the session resolver, the policy store/compiler,
//! the notification listener, the audit writer, the partition manager)
//! that the external collaborators named in the specification must
//! satisfy. It does not implement any of those collaborators itself.

pub mod attributes;
pub mod audit;
pub mod condition;
pub mod decision;
pub mod error;
pub mod notification;
pub mod policy;
pub mod providers;
pub mod request;
pub mod retention;
pub mod session;

pub use attributes::{AttrValue, AttributeBags, NamespacedAttrs};
pub use audit::{AuditMode, AuditWriter, Entry as AuditEntry};
pub use condition::{AttrRef, CompareOp, Condition, Value};
pub use decision::{Decision, Effect, PolicyEffect, PolicyMatch};
pub use error::{ReaperError, Result, ERROR_CODE_SESSION_INVALID};
pub use notification::{BackoffPolicy, NotificationListener};
pub use policy::{
    CompileError, CompiledPolicy, PolicyCompiler, PolicyEntry, PolicyId, PolicyStore,
    PolicyVersion, RawPolicy, Snapshot, Target,
};
pub use providers::{AttributeProvider, EnvironmentProvider};
pub use request::{entity_type, split_entity_ref, AccessRequest, SYSTEM_SUBJECT};
pub use retention::{PartitionManager, RetentionConfig, RetentionCycleReport, DETACH_DROP_GRACE};
pub use session::SessionResolver;

/// Current Reaper version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reaper build information for telemetry and debugging.
pub const BUILD_INFO: &str = concat!(
    "Reaper ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Standard API endpoints exposed by the Reaper services.
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
    pub const API_V1_EVALUATE: &str = "/api/v1/evaluate";
    pub const API_V1_POLICIES: &str = "/api/v1/policies";
    pub const API_V1_PARTITIONS: &str = "/api/v1/partitions";
    pub const API_V1_RETENTION: &str = "/api/v1/retention";
}
