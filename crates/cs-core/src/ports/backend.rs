use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::{StoreError, StoreResult};
use crate::ids::{Locator, OwnerRef};

use super::{BackendCopyPort, ExistenceProbePort, ResumableUploadPort};

/// Byte stream handed between the store, the backend and callers.
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StoreFeature {
    /// `delete_owner` removes every blob of an owner in one call.
    BulkDelete,
    /// Blobs are reachable from every server, not just the one that wrote them.
    Centralized,
    /// The backend deduplicates identical content on create.
    SingleInstanceServerCreate,
    /// `resumable()` returns a capability object.
    ResumableUpload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreFeatures(BTreeSet<StoreFeature>);

impl StoreFeatures {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, feature: StoreFeature) -> bool {
        self.0.contains(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = StoreFeature> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<StoreFeature> for StoreFeatures {
    fn from_iter<I: IntoIterator<Item = StoreFeature>>(iter: I) -> Self {
        StoreFeatures(iter.into_iter().collect())
    }
}

/// Per-store adapter: write, read and delete by locator.
#[async_trait]
pub trait BlobBackendPort: Send + Sync {
    fn features(&self) -> StoreFeatures;

    fn supports(&self, feature: StoreFeature) -> bool {
        self.features().contains(feature)
    }

    /// Upload `data` and return the locator the backend assigned.
    ///
    /// `size` is `None` when the length is unknown; adapters must accept
    /// that, buffering internally if their wire protocol needs a length.
    async fn write(
        &self,
        data: &mut (dyn AsyncRead + Send + Unpin),
        size: Option<u64>,
        owner: OwnerRef,
    ) -> StoreResult<Locator>;

    /// Fails with `NotFound` when the adapter can tell the locator is
    /// absent, `Transport` otherwise.
    async fn read(&self, locator: &Locator, owner: OwnerRef) -> StoreResult<ContentStream>;

    /// Idempotent: an absent locator yields `Ok(false)`, never an error.
    async fn delete(&self, locator: &Locator, owner: OwnerRef) -> StoreResult<bool>;

    /// Only called when [`StoreFeature::BulkDelete`] is declared.
    async fn delete_owner(&self, _owner: OwnerRef) -> StoreResult<bool> {
        Err(StoreError::Unsupported(StoreFeature::BulkDelete))
    }

    fn resumable(&self) -> Option<&dyn ResumableUploadPort> {
        None
    }

    fn copier(&self) -> Option<&dyn BackendCopyPort> {
        None
    }

    fn existence_probe(&self) -> Option<&dyn ExistenceProbePort> {
        None
    }
}
