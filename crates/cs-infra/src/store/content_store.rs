//! Staged-commit storage orchestration.
//! 分阶段提交的存储编排。
//!
//! ```text
//! bytes ──stage──▶ StagedBlob ──link/rename_to──▶ MailboxBlob
//!                      │                              │
//!                delete_staged               delete_mailbox_blob
//! ```
//!
//! Reads go through the local cache; a miss fetches from the backend and
//! populates it, with concurrent misses for one locator sharing a fetch.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use cs_core::ports::BlobBackendPort;
use cs_core::{
    Blob, ContentDigest, ContentStream, ItemRevision, Locator, MailboxBlob, OwnerRef,
    RemoteBlobRef, StagedBlob, StoreConfig, StoreError, StoreFeature, StoreResult, UploadId,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tracing::{debug, debug_span, info, warn, Instrument};

use super::defaults::{fetch_validate, restage_copy};
use crate::blob::{open_blob, remove_local_file, BlobBuilder, BlobBuilderOptions, DigestingReader};
use crate::cache::LocalBlobCache;
use crate::incoming::IncomingArea;
use crate::upload::UploadSession;

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub compress_blobs: bool,
    pub cache_write_through: bool,
    /// Bulk delete aborts once more than this many deletes fail in a row.
    pub max_consecutive_failures: u32,
}

impl StoreOptions {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            compress_blobs: config.store.compress_blobs,
            cache_write_through: config.store.cache_write_through,
            max_consecutive_failures: config.delete.max_consecutive_failures,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

/// Summary of a completed [`ContentStore::delete_store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStoreOutcome {
    pub deleted: usize,
    /// Isolated failures that were logged and skipped.
    pub failed: usize,
    /// The backend removed the whole owner in one call.
    pub bulk: bool,
}

/// Content store for one backend.
/// 单个后端的内容存储。
pub struct ContentStore {
    backend: Arc<dyn BlobBackendPort>,
    cache: Arc<LocalBlobCache>,
    incoming: Arc<IncomingArea>,
    options: StoreOptions,
    inflight: Mutex<HashMap<Locator, Arc<Mutex<()>>>>,
}

impl ContentStore {
    pub fn new(
        backend: Arc<dyn BlobBackendPort>,
        cache: Arc<LocalBlobCache>,
        incoming: Arc<IncomingArea>,
        options: StoreOptions,
    ) -> Self {
        Self {
            backend,
            cache,
            incoming,
            options,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<LocalBlobCache> {
        &self.cache
    }

    pub fn incoming(&self) -> &Arc<IncomingArea> {
        &self.incoming
    }

    pub fn supports(&self, feature: StoreFeature) -> bool {
        self.backend.supports(feature)
    }

    /// Materialize a stream of unknown length as a local blob.
    pub async fn store_incoming<R>(&self, mut reader: R) -> StoreResult<Blob>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut builder = BlobBuilder::create(
            &self.incoming,
            BlobBuilderOptions {
                compress: self.options.compress_blobs,
                digest: true,
            },
        )
        .await?;
        if let Err(err) = builder.copy_from(&mut reader).await {
            builder.discard().await;
            return Err(err);
        }
        let blob = builder.finish().await?;
        debug!(
            path = %blob.path().display(),
            size_bytes = blob.raw_size(),
            compressed = blob.is_compressed(),
            "Stored incoming blob"
        );
        Ok(blob)
    }

    /// Upload content for `owner`.
    ///
    /// With a known `size` the stream goes straight to the backend and is
    /// digested on the way. Without one it is first materialized in the
    /// incoming area, staged from there and the temp file removed.
    pub async fn stage<R>(
        &self,
        reader: R,
        size: Option<u64>,
        owner: OwnerRef,
    ) -> StoreResult<StagedBlob>
    where
        R: AsyncRead + Send + Unpin,
    {
        let span = debug_span!("infra.store.stage", owner = %owner, size = ?size);
        async {
            match size {
                Some(size) => self.stage_stream(reader, size, owner).await,
                None => {
                    let blob = self.store_incoming(reader).await?;
                    let staged = self.stage_blob(&blob, owner).await;
                    if let Err(err) = self.delete_blob(blob).await {
                        warn!(error = %err, "Failed to remove incoming blob after staging");
                    }
                    staged
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Upload a local blob for `owner`, populating the cache from it when
    /// write-through is enabled.
    pub async fn stage_blob(&self, blob: &Blob, owner: OwnerRef) -> StoreResult<StagedBlob> {
        let stream = open_blob(blob).await?;
        let mut digesting = DigestingReader::new(stream);
        let locator = self
            .backend
            .write(&mut digesting, Some(blob.raw_size()), owner)
            .await?;
        let (digest, written) = digesting.finish();
        self.check_written(&locator, owner, blob.raw_size(), written)
            .await?;

        if let Some(recorded) = blob.digest() {
            if recorded != &digest {
                warn!(
                    locator = %locator,
                    recorded = %recorded,
                    streamed = %digest,
                    "Local blob changed since it was built"
                );
            }
        }

        if self.options.cache_write_through {
            if let Err(err) = self.cache.put_blob(&locator, blob).await {
                warn!(locator = %locator, error = %err, "Cache write-through failed");
            }
        }

        debug!(locator = %locator, size_bytes = written, "Staged blob");
        Ok(StagedBlob::new(owner, digest, written, locator))
    }

    async fn stage_stream<R>(
        &self,
        reader: R,
        size: u64,
        owner: OwnerRef,
    ) -> StoreResult<StagedBlob>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut digesting = DigestingReader::new(reader);
        let locator = self
            .backend
            .write(&mut digesting, Some(size), owner)
            .await?;
        let (digest, written) = digesting.finish();
        self.check_written(&locator, owner, size, written).await?;

        debug!(locator = %locator, size_bytes = written, "Staged stream");
        Ok(StagedBlob::new(owner, digest, written, locator))
    }

    /// A short stream must not leave a truncated object behind.
    async fn check_written(
        &self,
        locator: &Locator,
        owner: OwnerRef,
        declared: u64,
        written: u64,
    ) -> StoreResult<()> {
        if written == declared {
            return Ok(());
        }
        warn!(
            locator = %locator,
            declared,
            written,
            "Streamed size differs from declared size; deleting remote object"
        );
        if let Err(err) = self.backend.delete(locator, owner).await {
            warn!(locator = %locator, error = %err, "Failed to delete truncated object");
        }
        Err(StoreError::Transport(format!(
            "short write: declared {declared} bytes, streamed {written}"
        )))
    }

    /// Commit a staged blob to an item revision.
    pub fn link(&self, staged: StagedBlob, dest: ItemRevision) -> MailboxBlob {
        debug!(locator = %staged.locator(), dest = %dest, "Linking staged blob");
        staged.commit(dest)
    }

    /// Same as [`link`](Self::link); for callers that move rather than add content.
    pub fn rename_to(&self, staged: StagedBlob, dest: ItemRevision) -> MailboxBlob {
        debug!(locator = %staged.locator(), dest = %dest, "Renaming staged blob");
        staged.commit(dest)
    }

    /// Rebuild a committed blob from the owner layer's durable record.
    pub fn mailbox_blob(
        &self,
        dest: ItemRevision,
        locator: Locator,
        size: u64,
        digest: ContentDigest,
    ) -> MailboxBlob {
        MailboxBlob::new(dest, locator, size, digest)
    }

    pub async fn copy(&self, src: &MailboxBlob, dest: ItemRevision) -> StoreResult<MailboxBlob> {
        let span = debug_span!("infra.store.copy", src = %src.locator(), dest = %dest);
        async {
            match self.backend.copier() {
                Some(copier) => {
                    let locator = copier.copy(src, &dest).await?;
                    Ok(MailboxBlob::new(dest, locator, src.size(), src.digest().clone()))
                }
                None => restage_copy(self, src, dest).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Remove a local blob's file. Cache-managed blobs are left alone.
    pub async fn delete_blob(&self, blob: Blob) -> StoreResult<bool> {
        if blob.is_cache_managed() {
            debug!(path = %blob.path().display(), "Ignoring delete of cache-managed blob");
            return Ok(false);
        }
        remove_local_file(blob.path()).await
    }

    /// Give up a staged blob that will never be linked.
    pub async fn delete_staged(&self, staged: StagedBlob) -> StoreResult<bool> {
        let (owner, locator) = staged.into_locator();
        self.cache.remove(&locator).await;
        self.backend.delete(&locator, owner).await
    }

    /// Evict the locator from the cache, then delete it remotely.
    pub async fn delete_mailbox_blob(&self, blob: &MailboxBlob) -> StoreResult<bool> {
        self.cache.remove(blob.locator()).await;
        self.backend.delete(blob.locator(), blob.owner()).await
    }

    /// Delete every blob of an owner.
    ///
    /// Isolated failures are logged and skipped. Once more than
    /// `max_consecutive_failures` deletes fail in a row the operation stops
    /// with [`StoreError::BulkOperationAborted`] carrying the first failure
    /// of that run. Blobs deleted before the abort stay deleted.
    pub async fn delete_store(
        &self,
        owner: OwnerRef,
        blobs: &[MailboxBlob],
    ) -> StoreResult<DeleteStoreOutcome> {
        let span = debug_span!("infra.store.delete_store", owner = %owner, count = blobs.len());
        async {
            if self.backend.supports(StoreFeature::BulkDelete) {
                for blob in blobs {
                    self.cache.remove(blob.locator()).await;
                }
                self.backend.delete_owner(owner).await?;
                info!(deleted = blobs.len(), "Deleted owner store in bulk");
                return Ok(DeleteStoreOutcome {
                    deleted: blobs.len(),
                    failed: 0,
                    bulk: true,
                });
            }

            let threshold = self.options.max_consecutive_failures;
            let mut outcome = DeleteStoreOutcome::default();
            let mut consecutive = 0u32;
            let mut first_in_streak: Option<StoreError> = None;

            for blob in blobs {
                match self.delete_mailbox_blob(blob).await {
                    Ok(_) => {
                        outcome.deleted += 1;
                        consecutive = 0;
                        first_in_streak = None;
                    }
                    Err(err) => {
                        outcome.failed += 1;
                        consecutive += 1;
                        warn!(
                            locator = %blob.locator(),
                            consecutive,
                            error = %err,
                            "Failed to delete blob"
                        );
                        if first_in_streak.is_none() {
                            first_in_streak = Some(err);
                        }
                        if consecutive > threshold {
                            if let Some(source) = first_in_streak.take() {
                                return Err(StoreError::BulkOperationAborted {
                                    consecutive_failures: consecutive,
                                    source: Box::new(source),
                                });
                            }
                        }
                    }
                }
            }

            info!(
                deleted = outcome.deleted,
                failed = outcome.failed,
                "Deleted owner store"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Local copy of the content at `locator`.
    ///
    /// With `use_cache` the cache is consulted and populated on a miss;
    /// concurrent misses for one locator share a single backend read.
    /// Without it the content is fetched into an owned incoming blob that
    /// the caller must delete.
    pub async fn get_local_blob(
        &self,
        owner: OwnerRef,
        locator: &Locator,
        use_cache: bool,
    ) -> StoreResult<Blob> {
        self.fetch_local(owner, locator, use_cache, None)
            .instrument(debug_span!("infra.store.get_local_blob", locator = %locator))
            .await
    }

    /// Stream the content a blob reference points at.
    pub async fn get_content<B>(&self, blob: &B) -> StoreResult<ContentStream>
    where
        B: RemoteBlobRef + Sync,
    {
        let span = debug_span!("infra.store.get_content", locator = %blob.locator());
        async {
            let expected = Some((blob.digest(), blob.size()));
            let local = self
                .fetch_local(blob.owner(), blob.locator(), true, expected)
                .await?;
            match open_blob(&local).await {
                Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                    warn!("Cached file evicted before open; fetching again");
                    self.cache.remove(blob.locator()).await;
                    let local = self
                        .fetch_local(blob.owner(), blob.locator(), true, expected)
                        .await?;
                    open_blob(&local).await
                }
                other => other,
            }
        }
        .instrument(span)
        .await
    }

    /// Read the full content a blob reference points at.
    pub async fn read_content<B>(&self, blob: &B) -> StoreResult<Vec<u8>>
    where
        B: RemoteBlobRef + Sync,
    {
        let mut stream = self.get_content(blob).await?;
        let mut content = Vec::new();
        stream.read_to_end(&mut content).await?;
        Ok(content)
    }

    /// Whether the backend still holds the blob's content.
    pub async fn validate_blob(&self, blob: &MailboxBlob) -> bool {
        match self.backend.existence_probe() {
            Some(probe) => match probe.exists(blob.locator(), blob.owner()).await {
                Ok(exists) => exists,
                Err(err) => {
                    debug!(locator = %blob.locator(), error = %err, "Existence probe failed");
                    false
                }
            },
            None => fetch_validate(self, blob).await,
        }
    }

    /// Open a resumable upload. Fails with `Unsupported` when the backend
    /// has no resumable capability.
    pub async fn new_incoming_upload(
        &self,
        upload_id: UploadId,
        owner: OwnerRef,
    ) -> StoreResult<UploadSession> {
        let port = self
            .backend
            .resumable()
            .ok_or(StoreError::Unsupported(StoreFeature::ResumableUpload))?;
        port.begin_upload(&upload_id, owner).await?;
        info!(upload_id = %upload_id, owner = %owner, "Opened resumable upload");
        Ok(UploadSession::new(upload_id, owner, self.backend.clone()))
    }

    /// Seal a resumable upload into a staged blob.
    pub async fn finish_upload(&self, session: UploadSession) -> StoreResult<StagedBlob> {
        let upload_id = session.id().clone();
        let staged = session.complete().await?;
        info!(
            upload_id = %upload_id,
            locator = %staged.locator(),
            size_bytes = staged.size(),
            "Finished resumable upload"
        );
        Ok(staged)
    }

    async fn fetch_local(
        &self,
        owner: OwnerRef,
        locator: &Locator,
        use_cache: bool,
        expected: Option<(&ContentDigest, u64)>,
    ) -> StoreResult<Blob> {
        if !use_cache {
            return self.fetch_uncached(owner, locator, expected).await;
        }
        if let Some(handle) = self.cache.get(locator).await {
            return Ok(handle.into_blob());
        }

        let gate = self.inflight_gate(locator).await;
        let fetched: StoreResult<Blob> = async {
            let _guard = gate.lock().await;
            if let Some(handle) = self.cache.get(locator).await {
                debug!(locator = %locator, "Joined in-flight fetch");
                return Ok(handle.into_blob());
            }
            let mut stream = self.backend.read(locator, owner).await?;
            let handle = self.cache.put(locator, &mut stream).await?;
            check_expected(locator, expected, handle.digest(), handle.size());
            Ok(handle.into_blob())
        }
        .await;
        self.release_gate(locator, &gate).await;
        fetched
    }

    async fn fetch_uncached(
        &self,
        owner: OwnerRef,
        locator: &Locator,
        expected: Option<(&ContentDigest, u64)>,
    ) -> StoreResult<Blob> {
        let mut stream = self.backend.read(locator, owner).await?;
        let mut builder = BlobBuilder::create(&self.incoming, BlobBuilderOptions::default()).await?;
        if let Err(err) = builder.copy_from(&mut stream).await {
            builder.discard().await;
            return Err(err);
        }
        let blob = builder.finish().await?;
        if let Some(digest) = blob.digest() {
            check_expected(locator, expected, digest, blob.raw_size());
        }
        Ok(blob)
    }

    async fn inflight_gate(&self, locator: &Locator) -> Arc<Mutex<()>> {
        self.inflight
            .lock()
            .await
            .entry(locator.clone())
            .or_default()
            .clone()
    }

    async fn release_gate(&self, locator: &Locator, gate: &Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(locator)
            .is_some_and(|current| Arc::ptr_eq(current, gate))
        {
            inflight.remove(locator);
        }
    }
}

fn check_expected(
    locator: &Locator,
    expected: Option<(&ContentDigest, u64)>,
    digest: &ContentDigest,
    size: u64,
) {
    let Some((expected_digest, expected_size)) = expected else {
        return;
    };
    if expected_digest != digest || expected_size != size {
        warn!(
            locator = %locator,
            expected_digest = %expected_digest,
            actual_digest = %digest,
            expected_size,
            actual_size = size,
            "Fetched content does not match recorded digest or size"
        );
    }
}
