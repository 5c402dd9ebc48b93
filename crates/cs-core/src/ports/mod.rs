//! Port interfaces for the content store
//!
//! Ports define the contract between the storage orchestration and the
//! collaborators around it: the per-store backend adapter, the
//! active-reference oracle consulted before cache eviction, and the clock.
//!
//! Optional backend behaviour is never discovered by downcasting. A backend
//! declares [`StoreFeature`] flags and hands out capability objects from
//! fallible lookups (`resumable()`, `copier()`, `existence_probe()`).

mod backend;
mod clock;
mod copy;
mod eviction;
mod probe;
mod resumable;

pub use backend::{BlobBackendPort, ContentStream, StoreFeature, StoreFeatures};
pub use clock::ClockPort;
pub use copy::BackendCopyPort;
pub use eviction::{AlwaysEvictable, EvictionSafetyPort};
pub use probe::ExistenceProbePort;
pub use resumable::ResumableUploadPort;
