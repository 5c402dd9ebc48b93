//! # cs-infra
//!
//! Infrastructure for the content store: blob building, the incoming
//! staging area and its sweeper, the local disk cache, the staged-commit
//! orchestrator and resumable upload sessions.

pub mod blob;
pub mod cache;
pub mod incoming;
pub mod store;
pub mod time;
pub mod upload;

pub use blob::{BlobBuilder, BlobBuilderOptions, DigestingReader};
pub use cache::{CacheHandle, CacheLimits, CacheStats, LocalBlobCache};
pub use incoming::{IncomingArea, IncomingFile, IncomingSweeper};
pub use store::{fetch_validate, restage_copy, ContentStore, DeleteStoreOutcome, StoreOptions};
pub use time::SystemClock;
pub use upload::UploadSession;
