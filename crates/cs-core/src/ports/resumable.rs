use async_trait::async_trait;

use crate::error::StoreResult;
use crate::ids::{Locator, OwnerRef, UploadId};

/// Append-style upload capability.
///
/// Obtained through `BlobBackendPort::resumable()`; a backend without
/// incremental upload simply returns `None` there.
#[async_trait]
pub trait ResumableUploadPort: Send + Sync {
    async fn begin_upload(&self, upload_id: &UploadId, owner: OwnerRef) -> StoreResult<()>;

    /// Append a chunk and return the total number of bytes the backend now
    /// holds durably. A short total means only a prefix of the chunk landed.
    async fn append(&self, upload_id: &UploadId, chunk: &[u8]) -> StoreResult<u64>;

    /// Bytes durably received so far.
    async fn remote_size(&self, upload_id: &UploadId) -> StoreResult<u64>;

    async fn finish_upload(&self, upload_id: &UploadId, owner: OwnerRef) -> StoreResult<Locator>;

    async fn abort_upload(&self, upload_id: &UploadId) -> StoreResult<()>;
}
