use async_trait::async_trait;

use crate::blob::MailboxBlob;
use crate::error::StoreResult;
use crate::ids::{ItemRevision, Locator};

/// Backend-side copy, for stores that can duplicate an object without the
/// bytes passing through this server. Without it, copies re-upload.
#[async_trait]
pub trait BackendCopyPort: Send + Sync {
    async fn copy(&self, src: &MailboxBlob, dest: &ItemRevision) -> StoreResult<Locator>;
}
