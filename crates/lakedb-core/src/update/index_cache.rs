//! Primary-index cache types.
//!
//! The update manager caches one primary index per tablet. The applier
//! holds at most one refcounted entry handle at a time, pinned against
//! background eviction by an opaque guard for as long as the applier
//! lives.

use std::sync::Arc;

use lakedb_commons::models::TabletMetadata;
use lakedb_commons::TabletId;

use crate::builder::MetaFileBuilder;
use crate::error::ApplierResult;

/// The in-memory primary index of one tablet.
///
/// Internal layout is the update manager's concern; the applier only
/// drives the lifecycle below.
pub trait PrimaryIndex: Send + Sync {
    /// Persist index state consistent with the new metadata snapshot
    fn commit(
        &self,
        metadata: &TabletMetadata,
        builder: &mut dyn MetaFileBuilder,
    ) -> ApplierResult<()>;

    /// Drop in-memory state; the next preparation rebuilds from persisted
    /// rowsets
    fn unload(&self);

    /// Resident size, reported back to the cache after commit
    fn memory_usage(&self) -> u64;
}

/// A cached primary index entry.
pub struct IndexEntry {
    tablet_id: TabletId,
    index: Box<dyn PrimaryIndex>,
}

impl IndexEntry {
    /// Wrap an index for the given tablet
    pub fn new(tablet_id: TabletId, index: Box<dyn PrimaryIndex>) -> Self {
        Self { tablet_id, index }
    }

    /// Tablet the entry belongs to
    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    /// The cached index
    pub fn index(&self) -> &dyn PrimaryIndex {
        self.index.as_ref()
    }
}

/// Refcounted handle to a cached entry. `release` decrements, `remove`
/// decrements and evicts.
pub type IndexEntryHandle = Arc<IndexEntry>;

/// Opaque guard pinning a cache entry against eviction.
///
/// Returned by `prepare_primary_index`; the applier keeps it until the
/// entry is released or removed.
pub trait IndexGuard: Send {}

/// Cache-level operations the applier reaches through the update manager.
pub trait IndexCache: Send + Sync {
    /// Best-effort eviction by tablet id. Returns false when the entry is
    /// pinned by an active applier; it is evicted when that applier
    /// finishes.
    fn try_remove_by_key(&self, tablet_id: TabletId) -> bool;

    /// Refresh the cache's accounting of an entry's resident size
    fn update_object_size(&self, entry: &IndexEntryHandle, bytes: u64);
}
