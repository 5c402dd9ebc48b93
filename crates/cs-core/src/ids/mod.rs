//! ID type wrappers for type safety.

mod id_macro;
pub mod locator;
pub mod owner;
pub mod upload_id;

pub use locator::Locator;
pub use owner::{ItemId, ItemRevision, OwnerRef, Revision};
pub use upload_id::UploadId;
