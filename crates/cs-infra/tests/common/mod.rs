//! In-memory backend and store wiring shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cs_core::ports::{
    AlwaysEvictable, BackendCopyPort, BlobBackendPort, ExistenceProbePort, ResumableUploadPort,
};
use cs_core::{
    ContentStream, ItemRevision, Locator, MailboxBlob, OwnerRef, RemoteBlobRef, StoreError,
    StoreFeature, StoreFeatures, StoreResult, UploadId,
};
use cs_infra::{CacheLimits, ContentStore, IncomingArea, LocalBlobCache, StoreOptions, SystemClock};
use tokio::io::{AsyncRead, AsyncReadExt};

pub struct FakeBackend {
    features: StoreFeatures,
    objects: Mutex<HashMap<Locator, Vec<u8>>>,
    uploads: Mutex<HashMap<UploadId, Vec<u8>>>,
    next_locator: AtomicUsize,
    read_delay: Option<Duration>,
    fail_all_deletes: AtomicBool,
    failing_locators: Mutex<HashSet<Locator>>,
    /// Accept this many bytes of the next append, then fail it.
    append_fault: Mutex<Option<usize>>,
    probe: bool,
    server_copy: bool,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
    pub copies: AtomicUsize,
    pub owner_deletes: Mutex<Vec<OwnerRef>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::with_features(StoreFeatures::none())
    }

    pub fn with_features(features: StoreFeatures) -> Self {
        Self {
            features,
            objects: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            next_locator: AtomicUsize::new(1),
            read_delay: None,
            fail_all_deletes: AtomicBool::new(false),
            failing_locators: Mutex::new(HashSet::new()),
            append_fault: Mutex::new(None),
            probe: false,
            server_copy: false,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
            owner_deletes: Mutex::new(Vec::new()),
        }
    }

    pub fn resumable() -> Self {
        Self::with_features([StoreFeature::ResumableUpload].into_iter().collect())
    }

    pub fn bulk_delete() -> Self {
        Self::with_features([StoreFeature::BulkDelete].into_iter().collect())
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn with_existence_probe(mut self) -> Self {
        self.probe = true;
        self
    }

    /// Duplicate objects backend-side instead of re-uploading them.
    pub fn with_server_copy(mut self) -> Self {
        self.server_copy = true;
        self
    }

    pub fn fail_all_deletes(&self) {
        self.fail_all_deletes.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes_of(&self, locator: &Locator) {
        self.failing_locators.lock().unwrap().insert(locator.clone());
    }

    pub fn fail_next_append_after(&self, accepted: usize) {
        *self.append_fault.lock().unwrap() = Some(accepted);
    }

    /// Seed an object directly, as if an earlier process had written it.
    pub fn insert(&self, locator: &str, content: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(Locator::from(locator), content.to_vec());
    }

    pub fn object(&self, locator: &Locator) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(locator).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    fn allocate_locator(&self) -> Locator {
        let n = self.next_locator.fetch_add(1, Ordering::SeqCst);
        Locator::from(format!("L{n}"))
    }
}

#[async_trait]
impl BlobBackendPort for FakeBackend {
    fn features(&self) -> StoreFeatures {
        self.features.clone()
    }

    async fn write(
        &self,
        data: &mut (dyn AsyncRead + Send + Unpin),
        _size: Option<u64>,
        _owner: OwnerRef,
    ) -> StoreResult<Locator> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut content = Vec::new();
        data.read_to_end(&mut content)
            .await
            .map_err(StoreError::transport)?;
        let locator = self.allocate_locator();
        self.objects
            .lock()
            .unwrap()
            .insert(locator.clone(), content);
        Ok(locator)
    }

    async fn read(&self, locator: &Locator, _owner: OwnerRef) -> StoreResult<ContentStream> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        let content = self
            .object(locator)
            .ok_or_else(|| StoreError::NotFound(locator.clone()))?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn delete(&self, locator: &Locator, _owner: OwnerRef) -> StoreResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_deletes.load(Ordering::SeqCst)
            || self.failing_locators.lock().unwrap().contains(locator)
        {
            return Err(StoreError::Transport(format!("delete of {locator} refused")));
        }
        Ok(self.objects.lock().unwrap().remove(locator).is_some())
    }

    async fn delete_owner(&self, owner: OwnerRef) -> StoreResult<bool> {
        self.owner_deletes.lock().unwrap().push(owner);
        self.objects.lock().unwrap().clear();
        Ok(true)
    }

    fn resumable(&self) -> Option<&dyn ResumableUploadPort> {
        self.features
            .contains(StoreFeature::ResumableUpload)
            .then_some(self as &dyn ResumableUploadPort)
    }

    fn existence_probe(&self) -> Option<&dyn ExistenceProbePort> {
        self.probe.then_some(self as &dyn ExistenceProbePort)
    }

    fn copier(&self) -> Option<&dyn BackendCopyPort> {
        self.server_copy.then_some(self as &dyn BackendCopyPort)
    }
}

#[async_trait]
impl BackendCopyPort for FakeBackend {
    async fn copy(&self, src: &MailboxBlob, _dest: &ItemRevision) -> StoreResult<Locator> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        let content = self
            .object(src.locator())
            .ok_or_else(|| StoreError::NotFound(src.locator().clone()))?;
        let locator = self.allocate_locator();
        self.objects
            .lock()
            .unwrap()
            .insert(locator.clone(), content);
        Ok(locator)
    }
}

#[async_trait]
impl ResumableUploadPort for FakeBackend {
    async fn begin_upload(&self, upload_id: &UploadId, _owner: OwnerRef) -> StoreResult<()> {
        self.uploads
            .lock()
            .unwrap()
            .insert(upload_id.clone(), Vec::new());
        Ok(())
    }

    async fn append(&self, upload_id: &UploadId, chunk: &[u8]) -> StoreResult<u64> {
        let fault = self.append_fault.lock().unwrap().take();
        let mut uploads = self.uploads.lock().unwrap();
        let buffer = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::Transport(format!("unknown upload {upload_id}")))?;
        match fault {
            Some(accepted) => {
                buffer.extend_from_slice(&chunk[..accepted.min(chunk.len())]);
                Err(StoreError::Transport("connection reset".to_string()))
            }
            None => {
                buffer.extend_from_slice(chunk);
                Ok(buffer.len() as u64)
            }
        }
    }

    async fn remote_size(&self, upload_id: &UploadId) -> StoreResult<u64> {
        self.uploads
            .lock()
            .unwrap()
            .get(upload_id)
            .map(|buffer| buffer.len() as u64)
            .ok_or_else(|| StoreError::Transport(format!("unknown upload {upload_id}")))
    }

    async fn finish_upload(&self, upload_id: &UploadId, _owner: OwnerRef) -> StoreResult<Locator> {
        let content = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| StoreError::Transport(format!("unknown upload {upload_id}")))?;
        let locator = self.allocate_locator();
        self.objects
            .lock()
            .unwrap()
            .insert(locator.clone(), content);
        Ok(locator)
    }

    async fn abort_upload(&self, upload_id: &UploadId) -> StoreResult<()> {
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

#[async_trait]
impl ExistenceProbePort for FakeBackend {
    async fn exists(&self, locator: &Locator, _owner: OwnerRef) -> StoreResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(locator))
    }
}

pub fn open_store(backend: Arc<FakeBackend>, root: &Path, options: StoreOptions) -> ContentStore {
    let cache = LocalBlobCache::new(
        root.join("cache"),
        CacheLimits {
            max_files: 100,
            max_bytes: 1024 * 1024,
            min_lifetime: Duration::ZERO,
        },
        Arc::new(AlwaysEvictable),
        Arc::new(SystemClock),
    )
    .unwrap();
    let incoming = IncomingArea::new(root.join("incoming")).unwrap();
    ContentStore::new(backend, Arc::new(cache), Arc::new(incoming), options)
}

pub fn no_write_through() -> StoreOptions {
    StoreOptions {
        cache_write_through: false,
        ..StoreOptions::default()
    }
}
