use async_trait::async_trait;

use crate::error::StoreResult;
use crate::ids::{Locator, OwnerRef};

/// Cheap existence check used to validate a blob without downloading it.
#[async_trait]
pub trait ExistenceProbePort: Send + Sync {
    async fn exists(&self, locator: &Locator, owner: OwnerRef) -> StoreResult<bool>;
}
