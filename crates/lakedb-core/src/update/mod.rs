//! Update manager boundary.
//!
//! The update manager owns everything shared across publications of
//! primary-key tablets: the primary-index cache, the per-tablet index
//! shard locks, and the publication routines that fold a write or a
//! compaction into an indexed tablet. The applier consumes these
//! capabilities; implementations live with the engine runtime.

pub mod index_cache;

pub use index_cache::{IndexCache, IndexEntry, IndexEntryHandle, IndexGuard, PrimaryIndex};

use lakedb_commons::models::{OpCompaction, OpWrite, TabletMetadata};
use lakedb_commons::{TabletId, TxnId};

use crate::builder::MetaFileBuilder;
use crate::error::ApplierResult;
use crate::tablet::Tablet;

/// Capabilities the applier consumes from the update manager.
pub trait UpdateManager: Send + Sync {
    /// Verify that `base_version` is still the version this manager
    /// expects to publish from; fails with `VersionStale` otherwise
    fn check_meta_version(&self, tablet: &Tablet, base_version: u64) -> ApplierResult<()>;

    /// Build or load the primary index reflecting tablet state at
    /// `base_version`, returning the cache entry and the guard pinning it.
    ///
    /// Caller must hold the tablet's index shard lock.
    fn prepare_primary_index(
        &self,
        metadata: &TabletMetadata,
        builder: &mut dyn MetaFileBuilder,
        base_version: u64,
        new_version: u64,
    ) -> ApplierResult<(IndexEntryHandle, Box<dyn IndexGuard>)>;

    /// Fold a write into an indexed tablet: update the index, emit delete
    /// vectors into the builder, append the new rowset to the metadata
    fn publish_primary_key_tablet(
        &self,
        op_write: &OpWrite,
        txn_id: TxnId,
        metadata: &mut TabletMetadata,
        tablet: &Tablet,
        entry: &IndexEntryHandle,
        builder: &mut dyn MetaFileBuilder,
        base_version: u64,
    ) -> ApplierResult<()>;

    /// Fold a compaction into an indexed tablet: merge delete vectors,
    /// replace the input range with the output rowset, park the inputs in
    /// `compaction_inputs`
    fn publish_primary_compaction(
        &self,
        op_compaction: &OpCompaction,
        txn_id: TxnId,
        metadata: &mut TabletMetadata,
        tablet: &Tablet,
        entry: &IndexEntryHandle,
        builder: &mut dyn MetaFileBuilder,
        base_version: u64,
    ) -> ApplierResult<()>;

    /// Lock the index shard owning this tablet, excluding background GC
    fn lock_pk_index_shard(&self, tablet_id: TabletId);

    /// Release the index shard lock
    fn unlock_pk_index_shard(&self, tablet_id: TabletId);

    /// Drop one reference to a cache entry, leaving it resident
    fn release_primary_index_cache(&self, entry: IndexEntryHandle);

    /// Drop one reference and evict the entry
    fn remove_primary_index_cache(&self, entry: IndexEntryHandle);

    /// Unload the tablet's primary index so the next preparation rebuilds
    /// it from persisted state
    fn unload_primary_index(&self, tablet_id: TabletId);

    /// Record the tablet's persistent-index setting
    fn set_enable_persistent_index(&self, tablet_id: TabletId, enable: bool);

    /// The primary-index cache
    fn index_cache(&self) -> &dyn IndexCache;
}

/// Scoped acquisition of a tablet's index shard lock; unlocks on drop.
pub struct ShardLockGuard<'a> {
    update_mgr: &'a dyn UpdateManager,
    tablet_id: TabletId,
}

impl<'a> ShardLockGuard<'a> {
    /// Acquire the shard lock for `tablet_id`
    pub fn lock(update_mgr: &'a dyn UpdateManager, tablet_id: TabletId) -> Self {
        update_mgr.lock_pk_index_shard(tablet_id);
        Self {
            update_mgr,
            tablet_id,
        }
    }
}

impl Drop for ShardLockGuard<'_> {
    fn drop(&mut self) {
        self.update_mgr.unlock_pk_index_shard(self.tablet_id);
    }
}

/// Rebuilds delete vectors and the primary index from persisted rowsets at
/// the base version.
pub trait PrimaryKeyRecover: Send + Sync {
    /// Run the recovery routine
    fn recover(
        &self,
        tablet: &Tablet,
        metadata: &mut TabletMetadata,
        builder: &mut dyn MetaFileBuilder,
    ) -> ApplierResult<()>;
}
