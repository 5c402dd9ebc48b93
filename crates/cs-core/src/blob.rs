//! Blob data model.
//!
//! Three stages of life for a piece of content:
//!
//! 1. [`Blob`]: bytes materialized in a local file, not tied to any backend
//!    or owner.
//! 2. [`StagedBlob`]: bytes uploaded to the backend, not yet committed to an
//!    item. Dropping responsibility for it means deleting its locator.
//! 3. [`MailboxBlob`]: the locator committed to one (owner, item, revision).
//!
//! Committing is a move: `link`/`rename_to` consume the `StagedBlob`, so a
//! committed blob can neither be committed twice nor deleted through its
//! staged form.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;
use crate::ids::{ItemId, ItemRevision, Locator, OwnerRef, Revision};

/// Who is responsible for removing a local blob file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOwnership {
    /// A temp file in the incoming area; the holder deletes it.
    Owned,
    /// A file inside the local cache; eviction governs its lifetime.
    CacheManaged,
}

/// Locally materialized bytes.
#[derive(Debug)]
pub struct Blob {
    path: PathBuf,
    raw_size: u64,
    digest: Option<ContentDigest>,
    compressed: bool,
    ownership: BlobOwnership,
}

impl Blob {
    pub fn new(
        path: PathBuf,
        raw_size: u64,
        digest: Option<ContentDigest>,
        compressed: bool,
        ownership: BlobOwnership,
    ) -> Self {
        Self {
            path,
            raw_size,
            digest,
            compressed,
            ownership,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the uncompressed content.
    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    /// `None` when the builder ran with digesting disabled.
    pub fn digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn ownership(&self) -> BlobOwnership {
        self.ownership
    }

    pub fn is_cache_managed(&self) -> bool {
        self.ownership == BlobOwnership::CacheManaged
    }
}

/// Anything that names content held by the backend.
pub trait RemoteBlobRef {
    fn owner(&self) -> OwnerRef;
    fn locator(&self) -> &Locator;
    fn size(&self) -> u64;
    fn digest(&self) -> &ContentDigest;
}

/// Result of staging: uploaded but not yet committed.
///
/// This value is linear. It ends either in `link`/`rename_to` (which move
/// it into a [`MailboxBlob`]) or in `delete_staged` (which deletes the
/// remote locator so no backend storage is orphaned).
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a staged blob must be linked or deleted, or its backend storage is orphaned"]
pub struct StagedBlob {
    owner: OwnerRef,
    digest: ContentDigest,
    size: u64,
    locator: Locator,
}

impl StagedBlob {
    pub fn new(owner: OwnerRef, digest: ContentDigest, size: u64, locator: Locator) -> Self {
        Self {
            owner,
            digest,
            size,
            locator,
        }
    }

    /// Move into the committed form.
    pub fn commit(self, dest: ItemRevision) -> MailboxBlob {
        MailboxBlob {
            owner: dest.owner,
            item: dest.item,
            revision: dest.revision,
            locator: self.locator,
            size: self.size,
            digest: self.digest,
        }
    }

    /// Give up the staged value, returning the parts needed to delete it.
    pub fn into_locator(self) -> (OwnerRef, Locator) {
        (self.owner, self.locator)
    }
}

impl RemoteBlobRef for StagedBlob {
    fn owner(&self) -> OwnerRef {
        self.owner
    }

    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn digest(&self) -> &ContentDigest {
        &self.digest
    }
}

/// Durable association between a locator and one item revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxBlob {
    owner: OwnerRef,
    item: ItemId,
    revision: Revision,
    locator: Locator,
    size: u64,
    digest: ContentDigest,
}

impl MailboxBlob {
    /// Rebuild from the owner layer's durable record.
    pub fn new(dest: ItemRevision, locator: Locator, size: u64, digest: ContentDigest) -> Self {
        Self {
            owner: dest.owner,
            item: dest.item,
            revision: dest.revision,
            locator,
            size,
            digest,
        }
    }

    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn item_revision(&self) -> ItemRevision {
        ItemRevision {
            owner: self.owner,
            item: self.item,
            revision: self.revision,
        }
    }
}

impl RemoteBlobRef for MailboxBlob {
    fn owner(&self) -> OwnerRef {
        self.owner
    }

    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn digest(&self) -> &ContentDigest {
        &self.digest
    }
}
