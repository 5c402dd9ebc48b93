use serde::{Deserialize, Serialize};

use super::id_macro::impl_numeric_id;

/// Reference to the tenant (mailbox) that owns a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerRef(i64);

/// Item id inside an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(i32);

/// Revision number of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(i32);

impl_numeric_id!(OwnerRef(i64), ItemId(i32), Revision(i32));

/// The (owner, item, revision) triple a blob is committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRevision {
    pub owner: OwnerRef,
    pub item: ItemId,
    pub revision: Revision,
}

impl ItemRevision {
    pub fn new(
        owner: impl Into<OwnerRef>,
        item: impl Into<ItemId>,
        revision: impl Into<Revision>,
    ) -> Self {
        Self {
            owner: owner.into(),
            item: item.into(),
            revision: revision.into(),
        }
    }
}

impl std::fmt::Display for ItemRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.owner, self.item, self.revision)
    }
}
