//! # Policy Engine
//!
//! The ABAC evaluation pipeline: attribute resolution, the compiled-policy
//! snapshot cache (with notification-driven reload), the condition
//! evaluator, and the deny-overrides combination engine.
//!
//! This crate wires [`reaper_core`]'s data model and trait contracts
//! together into something runnable; it depends on `message-queue` for
//! the audit logger and notification reconnect loop the cache and engine
//! both need.

pub mod bootstrap;
pub mod cache;
pub mod engine;
pub mod evaluator;
pub mod resolver;
pub mod retention;

pub use bootstrap::{InMemoryPolicyStore, JsonCompiler};
pub use cache::{Cache, DEFAULT_STALE_AFTER};
pub use engine::Engine;
pub use evaluator::evaluate as evaluate_condition;
pub use resolver::Resolver;
pub use retention::{run_once as run_retention_cycle, RetentionWorker, FUTURE_MONTHS};

pub use reaper_core;
