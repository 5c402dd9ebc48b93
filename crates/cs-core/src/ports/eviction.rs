use crate::digest::ContentDigest;

/// Active-reference oracle consulted before a cache entry is evicted.
///
/// Called while the cache holds its metadata lock; implementations must be
/// fast and must not call back into the cache.
pub trait EvictionSafetyPort: Send + Sync {
    /// `false` while the content is still referenced elsewhere, e.g. by a
    /// parsed-message cache.
    fn can_evict(&self, digest: &ContentDigest) -> bool;
}

/// No external references; every entry may be evicted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEvictable;

impl EvictionSafetyPort for AlwaysEvictable {
    fn can_evict(&self, _digest: &ContentDigest) -> bool {
        true
    }
}
