//! Bounded on-disk cache of backend content, keyed by locator.
//! 以定位符为键、具备容量上限的本地磁盘缓存。
//!
//! Each entry is a pair of files named by a random key: `<key>.blob` holds
//! the raw bytes and `<key>.json` records the locator, digest and size.
//! Bytes are written to `<key>.part` first and renamed into place, so a
//! crash never leaves a half-written entry that `startup` would trust.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use cs_core::ports::{ClockPort, EvictionSafetyPort};
use cs_core::{Blob, BlobOwnership, CacheConfig, ContentDigest, Locator, StoreResult};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::{open_blob, DigestingReader};

const DATA_SUFFIX: &str = ".blob";
const META_SUFFIX: &str = ".json";
const PARTIAL_SUFFIX: &str = ".part";

/// Size and age bounds for the cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_files: usize,
    pub max_bytes: u64,
    /// Entries accessed more recently than this are never evicted.
    pub min_lifetime: Duration,
}

impl CacheLimits {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_files: config.max_files,
            max_bytes: config.max_bytes,
            min_lifetime: config.min_lifetime(),
        }
    }
}

/// A cached file as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    locator: Locator,
    path: PathBuf,
    digest: ContentDigest,
    size: u64,
}

impl CacheHandle {
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// View as a cache-managed [`Blob`]; deleting it through the store is a no-op.
    pub fn into_blob(self) -> Blob {
        Blob::new(
            self.path,
            self.size,
            Some(self.digest),
            false,
            BlobOwnership::CacheManaged,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    locator: Locator,
    digest: ContentDigest,
    size: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: String,
    locator: Locator,
    digest: ContentDigest,
    size: u64,
    last_access_ms: i64,
}

struct Inner {
    entries: HashMap<Locator, CacheEntry>,
    /// Least recently used first.
    queue: VecDeque<Locator>,
    current_bytes: u64,
}

/// Local cache of remote content.
/// 远端内容的本地缓存。
///
/// Eviction walks entries from least to most recently used and skips any
/// entry that is younger than the minimum lifetime or that the
/// [`EvictionSafetyPort`] still reports as referenced. When nothing
/// qualifies the cache is allowed to exceed its limits.
pub struct LocalBlobCache {
    dir: PathBuf,
    limits: CacheLimits,
    safety: Arc<dyn EvictionSafetyPort>,
    clock: Arc<dyn ClockPort>,
    inner: Mutex<Inner>,
}

impl LocalBlobCache {
    pub fn new(
        dir: impl Into<PathBuf>,
        limits: CacheLimits,
        safety: Arc<dyn EvictionSafetyPort>,
        clock: Arc<dyn ClockPort>,
    ) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            limits,
            safety,
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                queue: VecDeque::new(),
                current_bytes: 0,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Rebuild the index from disk.
    /// 从磁盘重建缓存索引。
    ///
    /// Entries are ordered by data file modification time, which `put` and
    /// `get` stamp with the access time. Partial writes, entries with
    /// unreadable metadata, size mismatches and orphan data files are
    /// deleted. Returns the number of entries loaded.
    pub async fn startup(&self) -> StoreResult<usize> {
        let mut meta_keys = Vec::new();
        let mut data_keys = HashSet::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!("Skipping cache entry with non-utf8 filename");
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                remove_quietly(&entry.path()).await;
            } else if let Some(key) = name.strip_suffix(META_SUFFIX) {
                meta_keys.push(key.to_string());
            } else if let Some(key) = name.strip_suffix(DATA_SUFFIX) {
                data_keys.insert(key.to_string());
            }
        }

        let mut loaded = Vec::new();
        for key in meta_keys {
            let restored = if data_keys.remove(&key) {
                self.restore_entry(&key).await
            } else {
                Err(io::Error::new(io::ErrorKind::NotFound, "data file missing"))
            };
            match restored {
                Ok(entry) => loaded.push(entry),
                Err(err) => {
                    warn!(key = %key, error = %err, "Discarding unusable cache entry");
                    self.delete_key(&key).await;
                }
            }
        }
        for key in data_keys {
            debug!(key = %key, "Discarding cache data without metadata");
            self.delete_key(&key).await;
        }

        loaded.sort_by_key(|entry| entry.last_access_ms);
        let mut count = loaded.len();
        let (duplicates, victims) = {
            let mut inner = self.inner.lock().await;
            let duplicates: Vec<CacheEntry> = loaded
                .into_iter()
                .filter_map(|entry| inner.push(entry))
                .collect();
            let victims = inner.collect_victims(
                self.clock.now_ms(),
                None,
                &self.limits,
                self.safety.as_ref(),
            );
            (duplicates, victims)
        };
        count -= duplicates.len();
        for duplicate in &duplicates {
            warn!(locator = %duplicate.locator, "Duplicate cache entry for locator");
        }
        self.delete_entries(duplicates.into_iter().chain(victims).collect())
            .await;

        let stats = self.stats().await;
        info!(
            entries = stats.entries,
            bytes = stats.bytes,
            dir = %self.dir.display(),
            "Local cache loaded"
        );
        Ok(count)
    }

    /// Look up an entry, refreshing its recency. An entry whose file has
    /// disappeared is dropped from the index and reported as a miss.
    pub async fn get(&self, locator: &Locator) -> Option<CacheHandle> {
        let entry = {
            let mut inner = self.inner.lock().await;
            inner.touch(locator, self.clock.now_ms())?
        };

        let path = self.data_path(&entry.key);
        match fs::metadata(&path).await {
            Ok(_) => {
                stamp_access(&path, entry.last_access_ms).await;
                Some(CacheHandle {
                    locator: entry.locator,
                    path,
                    digest: entry.digest,
                    size: entry.size,
                })
            }
            Err(err) => {
                warn!(locator = %locator, error = %err, "Cached file missing; dropping entry");
                let mut inner = self.inner.lock().await;
                if inner
                    .entries
                    .get(locator)
                    .is_some_and(|current| current.key == entry.key)
                {
                    inner.remove_entry(locator);
                }
                None
            }
        }
    }

    /// Whether an entry is indexed, without touching its recency.
    pub async fn contains(&self, locator: &Locator) -> bool {
        self.inner.lock().await.entries.contains_key(locator)
    }

    /// Stream content into the cache under `locator`.
    pub async fn put(
        &self,
        locator: &Locator,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<CacheHandle> {
        let key = new_key();
        let partial = self.dir.join(format!("{key}{PARTIAL_SUFFIX}"));

        let written = write_partial(&partial, reader).await;
        let (digest, size) = match written {
            Ok(written) => written,
            Err(err) => {
                remove_quietly(&partial).await;
                return Err(err);
            }
        };

        let meta = EntryMeta {
            locator: locator.clone(),
            digest,
            size,
        };
        if let Err(err) = self.write_meta(&key, &meta).await {
            remove_quietly(&partial).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&partial, self.data_path(&key)).await {
            remove_quietly(&partial).await;
            remove_quietly(&self.meta_path(&key)).await;
            return Err(err.into());
        }

        Ok(self.insert(key, meta).await)
    }

    /// Populate the cache from a local blob. An uncompressed blob with a
    /// known digest is hard-linked (or copied) instead of re-read.
    pub async fn put_blob(&self, locator: &Locator, blob: &Blob) -> StoreResult<CacheHandle> {
        let digest = match blob.digest() {
            Some(digest) if !blob.is_compressed() => digest.clone(),
            _ => {
                let mut stream = open_blob(blob).await?;
                return self.put(locator, &mut stream).await;
            }
        };

        let key = new_key();
        let data = self.data_path(&key);
        if fs::hard_link(blob.path(), &data).await.is_err() {
            fs::copy(blob.path(), &data).await?;
        }
        let meta = EntryMeta {
            locator: locator.clone(),
            digest,
            size: blob.raw_size(),
        };
        if let Err(err) = self.write_meta(&key, &meta).await {
            remove_quietly(&data).await;
            return Err(err);
        }

        Ok(self.insert(key, meta).await)
    }

    /// Drop one entry. Returns whether it was present.
    pub async fn remove(&self, locator: &Locator) -> bool {
        let removed = self.inner.lock().await.remove_entry(locator);
        match removed {
            Some(entry) => {
                self.delete_key(&entry.key).await;
                true
            }
            None => false,
        }
    }

    /// Drop every entry. Returns the number removed.
    pub async fn remove_all(&self) -> usize {
        let drained: Vec<CacheEntry> = {
            let mut inner = self.inner.lock().await;
            inner.queue.clear();
            inner.current_bytes = 0;
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        self.delete_entries(drained).await;
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.current_bytes,
        }
    }

    async fn insert(&self, key: String, meta: EntryMeta) -> CacheHandle {
        let entry = CacheEntry {
            key,
            locator: meta.locator,
            digest: meta.digest,
            size: meta.size,
            last_access_ms: self.clock.now_ms(),
        };
        let handle = CacheHandle {
            locator: entry.locator.clone(),
            path: self.data_path(&entry.key),
            digest: entry.digest.clone(),
            size: entry.size,
        };
        stamp_access(&handle.path, entry.last_access_ms).await;

        let (replaced, victims) = {
            let mut inner = self.inner.lock().await;
            let replaced = inner.push(entry);
            let victims = inner.collect_victims(
                self.clock.now_ms(),
                Some(&handle.locator),
                &self.limits,
                self.safety.as_ref(),
            );
            (replaced, victims)
        };
        self.delete_entries(replaced.into_iter().chain(victims).collect())
            .await;

        debug!(locator = %handle.locator, size = handle.size, "Cached content");
        handle
    }

    async fn restore_entry(&self, key: &str) -> io::Result<CacheEntry> {
        let raw = fs::read(self.meta_path(key)).await?;
        let meta: EntryMeta = serde_json::from_slice(&raw)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let data = fs::metadata(self.data_path(key)).await?;
        if data.len() != meta.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("size {} on disk, {} recorded", data.len(), meta.size),
            ));
        }
        let last_access_ms = data
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_err(io::Error::other)?
            .as_millis() as i64;
        Ok(CacheEntry {
            key: key.to_string(),
            locator: meta.locator,
            digest: meta.digest,
            size: meta.size,
            last_access_ms,
        })
    }

    async fn write_meta(&self, key: &str, meta: &EntryMeta) -> StoreResult<()> {
        let json = serde_json::to_vec(meta)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(self.meta_path(key), json).await?;
        Ok(())
    }

    async fn delete_entries(&self, entries: Vec<CacheEntry>) {
        for entry in entries {
            debug!(locator = %entry.locator, size = entry.size, "Evicting cache entry");
            self.delete_key(&entry.key).await;
        }
    }

    async fn delete_key(&self, key: &str) {
        remove_quietly(&self.data_path(key)).await;
        remove_quietly(&self.meta_path(key)).await;
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{DATA_SUFFIX}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{META_SUFFIX}"))
    }
}

impl Inner {
    /// Insert at the most recently used end, returning any entry it replaced.
    fn push(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let replaced = self.remove_entry(&entry.locator);
        self.current_bytes = self.current_bytes.saturating_add(entry.size);
        self.queue.push_back(entry.locator.clone());
        self.entries.insert(entry.locator.clone(), entry);
        replaced
    }

    fn touch(&mut self, locator: &Locator, now_ms: i64) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(locator)?;
        entry.last_access_ms = now_ms;
        let entry = entry.clone();
        if let Some(pos) = self.queue.iter().position(|queued| queued == locator) {
            self.queue.remove(pos);
        }
        self.queue.push_back(locator.clone());
        Some(entry)
    }

    fn remove_entry(&mut self, locator: &Locator) -> Option<CacheEntry> {
        let entry = self.entries.remove(locator)?;
        self.current_bytes = self.current_bytes.saturating_sub(entry.size);
        self.queue.retain(|queued| queued != locator);
        Some(entry)
    }

    fn collect_victims(
        &mut self,
        now_ms: i64,
        keep: Option<&Locator>,
        limits: &CacheLimits,
        safety: &dyn EvictionSafetyPort,
    ) -> Vec<CacheEntry> {
        let min_lifetime_ms = limits.min_lifetime.as_millis() as i64;
        let mut victims = Vec::new();
        while self.entries.len() > limits.max_files || self.current_bytes > limits.max_bytes {
            let candidate = self.queue.iter().position(|locator| {
                if keep == Some(locator) {
                    return false;
                }
                self.entries
                    .get(locator)
                    .map(|entry| {
                        now_ms.saturating_sub(entry.last_access_ms) >= min_lifetime_ms
                            && safety.can_evict(&entry.digest)
                    })
                    .unwrap_or(false)
            });
            let Some(pos) = candidate else {
                debug!(
                    entries = self.entries.len(),
                    bytes = self.current_bytes,
                    "No evictable cache entry; limits exceeded"
                );
                break;
            };
            if let Some(locator) = self.queue.remove(pos) {
                victims.extend(self.remove_entry(&locator));
            }
        }
        victims
    }
}

fn new_key() -> String {
    Uuid::new_v4().simple().to_string()
}

async fn write_partial(
    path: &Path,
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> StoreResult<(ContentDigest, u64)> {
    let mut file = File::create(path).await?;
    let mut digesting = DigestingReader::new(reader);
    tokio::io::copy(&mut digesting, &mut file).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(digesting.finish())
}

/// Record an access time on the data file's mtime, where `startup` reads
/// recency back from.
async fn stamp_access(path: &Path, at_ms: i64) {
    let path = path.to_path_buf();
    let at = UNIX_EPOCH + Duration::from_millis(at_ms.max(0) as u64);
    let result = tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(at)
    })
    .await
    .map_err(io::Error::other)
    .and_then(|stamped| stamped);
    if let Err(err) = result {
        debug!(error = %err, "Failed to record cache access time");
    }
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove cache file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::RwLock;

    use cs_core::ports::AlwaysEvictable;

    struct ManualClock {
        now_ms: AtomicI64,
    }

    impl ManualClock {
        fn at(now_ms: i64) -> Arc<Self> {
            Arc::new(Self {
                now_ms: AtomicI64::new(now_ms),
            })
        }

        fn advance(&self, ms: i64) {
            self.now_ms.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl ClockPort for ManualClock {
        fn now_ms(&self) -> i64 {
            self.now_ms.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct PinnedDigests {
        pinned: RwLock<HashSet<ContentDigest>>,
    }

    impl PinnedDigests {
        fn pin(&self, digest: ContentDigest) {
            if let Ok(mut pinned) = self.pinned.write() {
                pinned.insert(digest);
            }
        }
    }

    impl EvictionSafetyPort for PinnedDigests {
        fn can_evict(&self, digest: &ContentDigest) -> bool {
            self.pinned
                .read()
                .map(|pinned| !pinned.contains(digest))
                .unwrap_or(false)
        }
    }

    fn limits(max_files: usize, max_bytes: u64, min_lifetime_ms: u64) -> CacheLimits {
        CacheLimits {
            max_files,
            max_bytes,
            min_lifetime: Duration::from_millis(min_lifetime_ms),
        }
    }

    fn locator(value: &str) -> Locator {
        Locator::from(value)
    }

    async fn put_bytes(
        cache: &LocalBlobCache,
        key: &str,
        bytes: &[u8],
    ) -> StoreResult<CacheHandle> {
        let mut reader = bytes;
        cache.put(&locator(key), &mut reader).await
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(10, 1_000, 0),
            Arc::new(AlwaysEvictable),
            ManualClock::at(0),
        )?;

        let handle = put_bytes(&cache, "L1", b"hello").await?;
        assert_eq!(handle.size(), 5);
        assert_eq!(handle.digest(), &ContentDigest::of(b"hello"));

        let hit = cache.get(&locator("L1")).await;
        assert_eq!(hit, Some(handle.clone()));
        assert_eq!(fs::read(handle.path()).await?, b"hello");
        assert_eq!(cache.get(&locator("L2")).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_count_limit_evicts_least_recently_used() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(2, 1_000, 0),
            Arc::new(AlwaysEvictable),
            ManualClock::at(0),
        )?;

        put_bytes(&cache, "a", b"1").await?;
        put_bytes(&cache, "b", b"2").await?;
        assert!(cache.get(&locator("a")).await.is_some());
        put_bytes(&cache, "c", b"3").await?;

        assert!(cache.contains(&locator("a")).await);
        assert!(!cache.contains(&locator("b")).await);
        assert!(cache.contains(&locator("c")).await);
        assert_eq!(cache.stats().await.entries, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_byte_limit_evicts_oldest() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(10, 4, 0),
            Arc::new(AlwaysEvictable),
            ManualClock::at(0),
        )?;

        put_bytes(&cache, "a", b"123").await?;
        put_bytes(&cache, "b", b"456").await?;

        assert!(!cache.contains(&locator("a")).await);
        assert!(cache.contains(&locator("b")).await);
        assert_eq!(cache.stats().await, CacheStats { entries: 1, bytes: 3 });
        Ok(())
    }

    #[tokio::test]
    async fn test_young_entries_survive_over_limit() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let clock = ManualClock::at(1_000_000);
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(2, 1_000, 60_000),
            Arc::new(AlwaysEvictable),
            clock.clone(),
        )?;

        put_bytes(&cache, "a", b"1").await?;
        put_bytes(&cache, "b", b"2").await?;
        put_bytes(&cache, "c", b"3").await?;
        assert_eq!(cache.stats().await.entries, 3);

        clock.advance(61_000);
        put_bytes(&cache, "d", b"4").await?;

        assert!(!cache.contains(&locator("a")).await);
        assert!(!cache.contains(&locator("b")).await);
        assert!(cache.contains(&locator("c")).await);
        assert!(cache.contains(&locator("d")).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_pinned_entries_are_never_evicted() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let safety = Arc::new(PinnedDigests::default());
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(1, 1_000, 0),
            safety.clone(),
            ManualClock::at(0),
        )?;

        let first = put_bytes(&cache, "a", b"first").await?;
        safety.pin(first.digest().clone());
        put_bytes(&cache, "b", b"second").await?;

        assert!(cache.contains(&locator("a")).await);
        assert!(cache.contains(&locator("b")).await);
        assert_eq!(cache.stats().await.entries, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_dropped_on_get() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(10, 1_000, 0),
            Arc::new(AlwaysEvictable),
            ManualClock::at(0),
        )?;

        let handle = put_bytes(&cache, "a", b"gone").await?;
        fs::remove_file(handle.path()).await?;

        assert_eq!(cache.get(&locator("a")).await, None);
        assert!(!cache.contains(&locator("a")).await);
        assert_eq!(cache.stats().await, CacheStats::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_reloads_entries_and_discards_debris() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        {
            let cache = LocalBlobCache::new(
                temp_dir.path(),
                limits(10, 1_000, 0),
                Arc::new(AlwaysEvictable),
                ManualClock::at(0),
            )?;
            put_bytes(&cache, "a", b"alpha").await?;
            put_bytes(&cache, "b", b"beta").await?;
        }
        fs::write(temp_dir.path().join("stray.part"), b"x").await?;
        fs::write(temp_dir.path().join("orphan.blob"), b"x").await?;
        fs::write(temp_dir.path().join("broken.json"), b"{not json").await?;
        fs::write(temp_dir.path().join("broken.blob"), b"x").await?;

        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(10, 1_000, 0),
            Arc::new(AlwaysEvictable),
            ManualClock::at(0),
        )?;
        assert_eq!(cache.startup().await?, 2);

        let hit = cache
            .get(&locator("a"))
            .await
            .ok_or_else(|| anyhow::anyhow!("entry not reloaded"))?;
        assert_eq!(hit.digest(), &ContentDigest::of(b"alpha"));
        assert_eq!(cache.stats().await, CacheStats { entries: 2, bytes: 9 });
        assert!(!temp_dir.path().join("stray.part").exists());
        assert!(!temp_dir.path().join("orphan.blob").exists());
        assert!(!temp_dir.path().join("broken.json").exists());
        assert!(!temp_dir.path().join("broken.blob").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_keeps_access_order() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let clock = ManualClock::at(1_000);
        {
            let cache = LocalBlobCache::new(
                temp_dir.path(),
                limits(2, 1_000, 0),
                Arc::new(AlwaysEvictable),
                clock.clone(),
            )?;
            put_bytes(&cache, "a", b"1").await?;
            clock.advance(1_000);
            put_bytes(&cache, "b", b"2").await?;
            clock.advance(1_000);
            assert!(cache.get(&locator("a")).await.is_some());
        }

        clock.advance(1_000);
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(2, 1_000, 0),
            Arc::new(AlwaysEvictable),
            clock.clone(),
        )?;
        assert_eq!(cache.startup().await?, 2);
        put_bytes(&cache, "c", b"3").await?;

        assert!(cache.contains(&locator("a")).await);
        assert!(!cache.contains(&locator("b")).await);
        assert!(cache.contains(&locator("c")).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_drops_duplicate_locator() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let clock = ManualClock::at(1_000);
        {
            let cache = LocalBlobCache::new(
                temp_dir.path(),
                limits(10, 1_000, 0),
                Arc::new(AlwaysEvictable),
                clock.clone(),
            )?;
            put_bytes(&cache, "a", b"old").await?;
        }
        // A second entry for the same locator, as left by an interrupted replace.
        let stale: Vec<_> = std::fs::read_dir(temp_dir.path())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect();
        for path in stale {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            fs::copy(&path, temp_dir.path().join(format!("dup{name}"))).await?;
        }

        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(10, 1_000, 0),
            Arc::new(AlwaysEvictable),
            clock.clone(),
        )?;
        assert_eq!(cache.startup().await?, 1);
        assert_eq!(cache.stats().await, CacheStats { entries: 1, bytes: 3 });

        let remaining = std::fs::read_dir(temp_dir.path())?.count();
        assert_eq!(remaining, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_put_blob_links_uncompressed_blob() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = LocalBlobCache::new(
            temp_dir.path().join("cache"),
            limits(10, 1_000, 0),
            Arc::new(AlwaysEvictable),
            ManualClock::at(0),
        )?;
        let source = temp_dir.path().join("source");
        fs::write(&source, b"payload").await?;
        let blob = Blob::new(
            source.clone(),
            7,
            Some(ContentDigest::of(b"payload")),
            false,
            BlobOwnership::Owned,
        );

        let handle = cache.put_blob(&locator("L1"), &blob).await?;
        fs::remove_file(&source).await?;

        assert_eq!(fs::read(handle.path()).await?, b"payload");
        assert_eq!(handle.digest(), &ContentDigest::of(b"payload"));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_and_remove_all() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = LocalBlobCache::new(
            temp_dir.path(),
            limits(10, 1_000, 0),
            Arc::new(AlwaysEvictable),
            ManualClock::at(0),
        )?;

        let a = put_bytes(&cache, "a", b"1").await?;
        put_bytes(&cache, "b", b"2").await?;
        put_bytes(&cache, "c", b"3").await?;

        assert!(cache.remove(&locator("a")).await);
        assert!(!cache.remove(&locator("a")).await);
        assert!(!a.path().exists());

        assert_eq!(cache.remove_all().await, 2);
        assert_eq!(cache.stats().await, CacheStats::default());
        Ok(())
    }
}
