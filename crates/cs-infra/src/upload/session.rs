//! Resumable upload session.
//! 可续传的上传会话。
//!
//! Chunks go straight to the backend; locally the session only tracks the
//! digest and size of what the backend has acknowledged, plus the last
//! chunk whose fate is unknown. After a failed append the session is
//! indeterminate until [`UploadSession::resume`] reconciles it with the
//! backend's durable byte count, or the caller abandons it.

use std::io;
use std::sync::Arc;

use cs_core::ports::{BlobBackendPort, ResumableUploadPort};
use cs_core::{OwnerRef, StagedBlob, StoreError, StoreFeature, StoreResult, UploadId};
use tracing::{debug, warn};

use crate::blob::BlobBuilder;

pub struct UploadSession {
    id: UploadId,
    owner: OwnerRef,
    backend: Arc<dyn BlobBackendPort>,
    tracker: BlobBuilder,
    unacked: Option<Vec<u8>>,
    indeterminate: bool,
}

impl UploadSession {
    pub(crate) fn new(id: UploadId, owner: OwnerRef, backend: Arc<dyn BlobBackendPort>) -> Self {
        Self {
            id,
            owner,
            backend,
            tracker: BlobBuilder::tracking(),
            unacked: None,
            indeterminate: false,
        }
    }

    pub fn id(&self) -> &UploadId {
        &self.id
    }

    pub fn owner(&self) -> OwnerRef {
        self.owner
    }

    /// Bytes acknowledged by the backend and folded into the local digest.
    pub fn local_size(&self) -> u64 {
        self.tracker.raw_size()
    }

    pub fn is_indeterminate(&self) -> bool {
        self.indeterminate
    }

    /// Bytes the backend holds durably for this upload.
    pub async fn remote_size(&self) -> StoreResult<u64> {
        self.port()?.remote_size(&self.id).await
    }

    /// Send one chunk. Returns the backend's durable byte count.
    ///
    /// A count short of the chunk end means the backend kept only a prefix;
    /// the caller resends from the returned offset.
    pub async fn append(&mut self, chunk: &[u8]) -> StoreResult<u64> {
        if self.indeterminate {
            return Err(StoreError::UploadIndeterminate);
        }
        if chunk.is_empty() {
            return Ok(self.local_size());
        }

        let local = self.local_size();
        let appended = self.port()?.append(&self.id, chunk).await;
        match appended {
            Ok(remote) => match self.acknowledge(local, remote, chunk).await {
                Ok(()) => Ok(remote),
                Err(err) => {
                    self.unacked = Some(chunk.to_vec());
                    Err(err)
                }
            },
            Err(err) => {
                warn!(
                    upload_id = %self.id,
                    offset = local,
                    chunk_bytes = chunk.len(),
                    error = %err,
                    "Append failed; upload is indeterminate"
                );
                self.unacked = Some(chunk.to_vec());
                self.indeterminate = true;
                Err(err)
            }
        }
    }

    /// Reconcile with the backend after a failed append. Returns the offset
    /// to continue sending from.
    pub async fn resume(&mut self) -> StoreResult<u64> {
        let remote = self.remote_size().await?;
        let local = self.local_size();
        let pending = self.unacked.take().unwrap_or_default();
        if let Err(err) = self.acknowledge(local, remote, &pending).await {
            self.unacked = Some(pending);
            return Err(err);
        }
        self.indeterminate = false;
        debug!(upload_id = %self.id, offset = remote, "Resumed upload");
        Ok(remote)
    }

    /// Drop the upload and whatever the backend holds for it.
    pub async fn abandon(self) -> StoreResult<()> {
        self.port()?.abort_upload(&self.id).await?;
        debug!(upload_id = %self.id, "Abandoned upload");
        Ok(())
    }

    pub(crate) async fn complete(self) -> StoreResult<StagedBlob> {
        if self.indeterminate {
            return Err(StoreError::UploadIndeterminate);
        }
        let port = self.port()?;
        let local = self.local_size();
        let remote = port.remote_size(&self.id).await?;
        if remote != local {
            return Err(StoreError::UploadOutOfSync { local, remote });
        }
        let locator = port.finish_upload(&self.id, self.owner).await?;

        let owner = self.owner;
        let (digest, size) = self.tracker.finish_tracking();
        let digest = digest.ok_or_else(|| io::Error::other("upload digest unavailable"))?;
        Ok(StagedBlob::new(owner, digest, size, locator))
    }

    /// Fold the part of `chunk` the backend acknowledged into the digest.
    async fn acknowledge(&mut self, local: u64, remote: u64, chunk: &[u8]) -> StoreResult<()> {
        let end = local + chunk.len() as u64;
        if remote < local || remote > end {
            self.indeterminate = true;
            return Err(StoreError::UploadOutOfSync { local, remote });
        }
        let landed = (remote - local) as usize;
        if landed < chunk.len() {
            debug!(
                upload_id = %self.id,
                landed,
                chunk_bytes = chunk.len(),
                "Backend accepted a partial chunk"
            );
        }
        self.tracker.append(&chunk[..landed]).await
    }

    fn port(&self) -> StoreResult<&dyn ResumableUploadPort> {
        self.backend
            .resumable()
            .ok_or(StoreError::Unsupported(StoreFeature::ResumableUpload))
    }
}
