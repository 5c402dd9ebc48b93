//! Default behaviours any backend may fall back on.

use cs_core::{ItemRevision, MailboxBlob, RemoteBlobRef, StoreResult};
use tracing::debug;

use super::ContentStore;

/// Copy by reading the full source and staging it as a new remote object.
pub async fn restage_copy(
    store: &ContentStore,
    src: &MailboxBlob,
    dest: ItemRevision,
) -> StoreResult<MailboxBlob> {
    let content = store.get_content(src).await?;
    let staged = store.stage(content, Some(src.size()), dest.owner).await?;
    Ok(store.link(staged, dest))
}

/// Validate by fetching the content and comparing it with the recorded
/// size and digest. Any failure, `NotFound` included, means invalid.
pub async fn fetch_validate<B>(store: &ContentStore, blob: &B) -> bool
where
    B: RemoteBlobRef + Sync,
{
    match store
        .get_local_blob(blob.owner(), blob.locator(), true)
        .await
    {
        Ok(local) => {
            local.raw_size() == blob.size()
                && local.digest().map_or(true, |digest| digest == blob.digest())
        }
        Err(err) => {
            debug!(locator = %blob.locator(), error = %err, "Blob failed validation fetch");
            false
        }
    }
}
