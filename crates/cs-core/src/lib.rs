//! # cs-core
//!
//! Core domain models and ports for the content store.
//!
//! This crate contains no infrastructure: it defines the blob data model,
//! the typed error, configuration DTOs and the port traits that backend
//! adapters and the infrastructure layer implement.

pub mod blob;
pub mod config;
pub mod digest;
pub mod error;
pub mod ids;
pub mod ports;

// Re-export commonly used types at the crate root
pub use blob::{Blob, BlobOwnership, MailboxBlob, RemoteBlobRef, StagedBlob};
pub use config::{
    CacheConfig, DeleteConfig, IncomingConfig, LoggingConfig, StoreConfig, StoreSection,
};
pub use digest::{ContentDigest, DigestAlgorithm, Digester};
pub use error::{StoreError, StoreResult};
pub use ids::{ItemId, ItemRevision, Locator, OwnerRef, Revision, UploadId};
pub use ports::{ContentStream, StoreFeature, StoreFeatures};
