use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::id_macro::impl_string_id;

/// Identifies one resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn new() -> Self {
        UploadId(Uuid::new_v4().to_string())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl_string_id!(UploadId);
