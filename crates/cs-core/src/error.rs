use std::fmt::Display;

use thiserror::Error;

use crate::ids::Locator;
use crate::ports::StoreFeature;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O failed. Never retried by the content store.
    #[error("backend transport failure: {0}")]
    Transport(String),

    #[error("locator not found: {0}")]
    NotFound(Locator),

    /// Fatal at startup.
    #[error("configuration failure: {0}")]
    Configuration(String),

    /// Raised by bulk delete once the consecutive-failure threshold is
    /// exceeded. Deletions that succeeded before the abort stay deleted.
    #[error("bulk operation aborted after {consecutive_failures} consecutive failures")]
    BulkOperationAborted {
        consecutive_failures: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("backend does not support {0:?}")]
    Unsupported(StoreFeature),

    #[error("upload session is indeterminate; resume or abandon it")]
    UploadIndeterminate,

    #[error("upload session out of sync: local {local} bytes, remote {remote} bytes")]
    UploadOutOfSync { local: u64, remote: u64 },

    #[error("local i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn transport(err: impl Display) -> Self {
        StoreError::Transport(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
