//! Periodic cleanup of abandoned temp blobs.
//! 定期清理被遗弃的临时 blob。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cs_core::ports::ClockPort;
use cs_core::StoreResult;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::IncomingArea;

/// Deletes incoming files older than a configured age.
///
/// Files younger than the threshold are never touched, so a blob that is
/// still being written or uploaded survives a sweep.
pub struct IncomingSweeper {
    area: Arc<IncomingArea>,
    clock: Arc<dyn ClockPort>,
    max_age: Duration,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IncomingSweeper {
    pub fn new(area: Arc<IncomingArea>, clock: Arc<dyn ClockPort>, max_age: Duration) -> Self {
        Self {
            area,
            clock,
            max_age,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// One sweep pass. Returns the number of files removed.
    pub async fn run_once(&self) -> StoreResult<usize> {
        sweep(&self.area, self.clock.as_ref(), self.max_age).await
    }

    /// Spawn the periodic sweep. A second call while running is a no-op.
    pub async fn start(&self, interval: Duration) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Incoming sweeper already running");
            return;
        }

        let area = self.area.clone();
        let clock = self.clock.clone();
        let max_age = self.max_age;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match sweep(&area, clock.as_ref(), max_age).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Swept expired incoming files"),
                    Err(err) => warn!(error = %err, "Incoming sweep failed"),
                }
            }
        });

        *self.handle.lock().await = Some(handle);
        info!(
            interval_secs = interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Incoming sweeper started"
        );
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        info!("Incoming sweeper stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn sweep(
    area: &IncomingArea,
    clock: &dyn ClockPort,
    max_age: Duration,
) -> StoreResult<usize> {
    let expired = area.list_expired(clock.now_ms(), max_age).await?;
    let mut removed = 0usize;
    for file in expired {
        match fs::remove_file(&file.path).await {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    path = %file.path.display(),
                    error = %err,
                    "Failed to delete expired incoming file"
                );
            }
        }
    }
    Ok(removed)
}
