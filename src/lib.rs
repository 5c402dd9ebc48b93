//! # contentstore
//!
//! Process wiring for the content store: configuration loading, tracing
//! setup and the runtime that owns the cache and the incoming sweeper.
//!
//! The domain model and ports live in `cs-core`; caching, staging and the
//! orchestrator live in `cs-infra`. Both are re-exported here.

pub mod bootstrap;

pub use bootstrap::{init_tracing_subscriber, load_config, ContentStoreRuntime};
pub use cs_core;
pub use cs_infra;
