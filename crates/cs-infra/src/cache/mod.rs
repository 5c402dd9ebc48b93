mod local_cache;

pub use local_cache::{CacheHandle, CacheLimits, CacheStats, LocalBlobCache};
