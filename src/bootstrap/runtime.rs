//! # Content store runtime
//!
//! Builds the content store from configuration and owns the pieces with
//! a lifecycle: the local cache is reloaded from disk on `startup` and the
//! incoming sweeper runs until `shutdown`.
//!
//! ```text
//! StoreConfig ──▶ IncomingArea ──┬──▶ IncomingSweeper (background task)
//!             └─▶ LocalBlobCache ┴──▶ ContentStore ◀── BlobBackendPort
//! ```

use std::sync::Arc;

use anyhow::Context;
use cs_core::ports::{BlobBackendPort, ClockPort, EvictionSafetyPort};
use cs_core::{DigestAlgorithm, StoreConfig};
use cs_infra::{
    CacheLimits, ContentStore, IncomingArea, IncomingSweeper, LocalBlobCache, StoreOptions,
    SystemClock,
};
use tracing::info;

/// Running content store with its background sweeper.
/// 运行中的内容存储及其后台清理任务。
pub struct ContentStoreRuntime {
    store: Arc<ContentStore>,
    sweeper: IncomingSweeper,
    config: StoreConfig,
}

impl ContentStoreRuntime {
    /// Validate configuration, prepare directories, reload the cache and
    /// start the sweeper.
    ///
    /// # Errors / 错误
    ///
    /// Fails fast on an unsupported digest algorithm or when the cache or
    /// incoming directories cannot be prepared.
    pub async fn startup(
        config: StoreConfig,
        backend: Arc<dyn BlobBackendPort>,
        safety: Arc<dyn EvictionSafetyPort>,
    ) -> anyhow::Result<Self> {
        Self::startup_with_clock(config, backend, safety, Arc::new(SystemClock)).await
    }

    pub async fn startup_with_clock(
        config: StoreConfig,
        backend: Arc<dyn BlobBackendPort>,
        safety: Arc<dyn EvictionSafetyPort>,
        clock: Arc<dyn ClockPort>,
    ) -> anyhow::Result<Self> {
        let algorithm = DigestAlgorithm::from_name(&config.store.digest_algorithm)
            .context("Unsupported digest algorithm")?;

        let incoming = Arc::new(
            IncomingArea::new(config.incoming.dir.clone()).with_context(|| {
                format!(
                    "Failed to prepare incoming dir: {}",
                    config.incoming.dir.display()
                )
            })?,
        );
        let cache = Arc::new(
            LocalBlobCache::new(
                config.cache.dir.clone(),
                CacheLimits::from_config(&config.cache),
                safety,
                clock.clone(),
            )
            .with_context(|| {
                format!(
                    "Failed to prepare cache dir: {}",
                    config.cache.dir.display()
                )
            })?,
        );
        let reloaded = cache
            .startup()
            .await
            .context("Failed to reload local cache")?;

        let sweeper = IncomingSweeper::new(incoming.clone(), clock, config.incoming.max_age());
        sweeper.start(config.incoming.sweep_interval()).await;

        let store = Arc::new(ContentStore::new(
            backend,
            cache,
            incoming,
            StoreOptions::from_config(&config),
        ));

        info!(
            digest_algorithm = algorithm.name(),
            cached_entries = reloaded,
            cache_dir = %config.cache.dir.display(),
            incoming_dir = %config.incoming.dir.display(),
            "Content store started"
        );

        Ok(Self {
            store,
            sweeper,
            config,
        })
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn sweeper(&self) -> &IncomingSweeper {
        &self.sweeper
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Stop the sweeper. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.sweeper.stop().await;
        info!("Content store stopped");
    }
}
