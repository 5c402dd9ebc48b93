mod content_store;
mod defaults;

pub use content_store::{ContentStore, DeleteStoreOutcome, StoreOptions};
pub use defaults::{fetch_validate, restage_copy};
