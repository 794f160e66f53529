//! Transaction log applier for primary-key tablets.
//!
//! Primary-key tablets keep a live row-keyed index in the update manager's
//! cache. Applying a log here means driving that index through its
//! lifecycle: lazily materialize it on the first write or compaction,
//! publish mutations through the update manager, commit it at finish, and
//! tear it down on any failure so the next attempt rebuilds from the base
//! version.

use std::sync::Arc;

use lakedb_commons::models::{
    OpCompaction, OpReplication, OpSchemaChange, OpWrite, TabletMetadata, TxnLog, TxnOp,
};
use lakedb_commons::{DelVector, TxnId};

use crate::applier::alter_meta::apply_alter_meta_log;
use crate::applier::validate_replication_meta;
use crate::builder::{MetaFileBuilder, RecoverFlag};
use crate::config::ApplierSettings;
use crate::error::{ApplierError, ApplierResult};
use crate::tablet::Tablet;
use crate::update::{IndexEntryHandle, IndexGuard, ShardLockGuard, UpdateManager};

/// The index-cache entry held by the applier, paired with the guard that
/// pins it against eviction.
struct HeldIndex {
    entry: IndexEntryHandle,
    guard: Box<dyn IndexGuard>,
}

/// Applier for primary-key tablets.
pub struct PrimaryKeyApplier {
    tablet: Tablet,
    metadata: TabletMetadata,
    base_version: u64,
    new_version: u64,
    /// Largest txn id folded in; prefixes delvec file names
    max_txn_id: TxnId,
    builder: Box<dyn MetaFileBuilder>,
    index: Option<HeldIndex>,
    has_finalized: bool,
    settings: ApplierSettings,
}

impl PrimaryKeyApplier {
    pub(crate) fn new(
        tablet: Tablet,
        mut metadata: TabletMetadata,
        new_version: u64,
        settings: ApplierSettings,
    ) -> Self {
        let base_version = metadata.version;
        // The version is stamped eagerly: schema-change handling may
        // persist an intermediate snapshot and rewrite it below.
        metadata.version = new_version;
        let builder = tablet.new_builder();
        Self {
            tablet,
            metadata,
            base_version,
            new_version,
            max_txn_id: TxnId::default(),
            builder,
            index: None,
            has_finalized: false,
            settings,
        }
    }

    pub(crate) fn init(&mut self) -> ApplierResult<()> {
        self.tablet
            .update_mgr()
            .check_meta_version(&self.tablet, self.base_version)
    }

    pub(crate) fn apply(&mut self, log: &TxnLog) -> ApplierResult<()> {
        self.max_txn_id = self.max_txn_id.max(log.txn_id);
        match &log.op {
            TxnOp::Write(op_write) => {
                self.check_and_recover(|this| this.apply_write_log(op_write, log.txn_id))
            }
            TxnOp::Compaction(op_compaction) => {
                self.check_and_recover(|this| this.apply_compaction_log(op_compaction, log.txn_id))
            }
            TxnOp::SchemaChange(op_schema_change) => {
                self.apply_schema_change_log(op_schema_change)
            }
            TxnOp::AlterMetadata(op_alter_metadata) => {
                // Alter-metadata logs are published alone, one version step.
                debug_assert_eq!(self.base_version + 1, self.new_version);
                apply_alter_meta_log(
                    &mut self.metadata,
                    op_alter_metadata,
                    self.tablet.update_mgr().as_ref(),
                )
            }
            TxnOp::Replication(op_replication) => {
                self.apply_replication_log(op_replication, log.txn_id)
            }
        }
    }

    /// Commit the primary index against the new metadata, then finalize
    /// the builder. Commit runs first: if either step fails the drop
    /// cleanup can still evict the index and a retry rebuilds from base.
    pub(crate) fn finish(mut self) -> ApplierResult<TabletMetadata> {
        if let Some(held) = &self.index {
            held.entry.index().commit(&self.metadata, self.builder.as_mut())?;
            let bytes = held.entry.index().memory_usage();
            self.tablet
                .update_mgr()
                .index_cache()
                .update_object_size(&held.entry, bytes);
        }
        self.builder.finalize(&mut self.metadata, self.max_txn_id)?;
        self.has_finalized = true;
        Ok(std::mem::take(&mut self.metadata))
    }

    /// Run a publish, and if it left a recover flag on the builder, run
    /// primary-key recovery. At most one recovery per apply: a flag still
    /// raised after the re-publish is fatal.
    fn check_and_recover<F>(&mut self, mut publish: F) -> ApplierResult<()>
    where
        F: FnMut(&mut Self) -> ApplierResult<()>,
    {
        let ret = publish(self);
        if self.settings.enable_primary_key_recover
            && self.builder.recover_flag() != RecoverFlag::Ok
        {
            let republish = self.builder.recover_flag() == RecoverFlag::RecoverWithPublish;
            log::info!(
                "Primary key recover begin, tablet_id: {} base_ver: {}",
                self.tablet.id(),
                self.base_version
            );
            // Let go of the cache entry, then rebuild delvecs and the
            // primary index from the persisted rowsets.
            if let Some(held) = self.index.take() {
                self.tablet.update_mgr().release_primary_index_cache(held.entry);
            }
            self.tablet
                .pk_recover()
                .recover(&self.tablet, &mut self.metadata, self.builder.as_mut())?;
            log::info!(
                "Primary key recover finish, tablet_id: {} base_ver: {}",
                self.tablet.id(),
                self.base_version
            );
            self.builder.set_recover_flag(RecoverFlag::Ok);
            if republish {
                // A duplicate primary key surfaced while preparing the
                // index; the log is not reflected in recovered state and
                // must be published again.
                publish(self)?;
                if self.builder.recover_flag() != RecoverFlag::Ok {
                    return Err(ApplierError::internal(
                        "primary key recovery requested again after re-publish",
                    ));
                }
            }
            // Without a re-publish the recovered state already reflects
            // the log.
            return Ok(());
        }
        ret
    }

    /// Materialize the primary index on first use.
    ///
    /// Not done in `init`: a schema-change log earlier in the batch moves
    /// the base version the index must be built against.
    fn prepare_index_once(
        &mut self,
        update_mgr: &dyn UpdateManager,
    ) -> ApplierResult<IndexEntryHandle> {
        if let Some(held) = &self.index {
            return Ok(Arc::clone(&held.entry));
        }
        let (entry, guard) = update_mgr.prepare_primary_index(
            &self.metadata,
            self.builder.as_mut(),
            self.base_version,
            self.new_version,
        )?;
        let handle = Arc::clone(&entry);
        self.index = Some(HeldIndex { entry, guard });
        Ok(handle)
    }

    fn apply_write_log(&mut self, op_write: &OpWrite, txn_id: TxnId) -> ApplierResult<()> {
        let update_mgr = Arc::clone(self.tablet.update_mgr());
        // Shard lock excludes the background GC that could evict the index
        // entry mid-publish; held for this log only.
        let _shard_lock = ShardLockGuard::lock(update_mgr.as_ref(), self.tablet.id());

        let entry = self.prepare_index_once(update_mgr.as_ref())?;

        if op_write.dels.is_empty()
            && op_write.rowset.num_rows == 0
            && op_write.rowset.delete_predicate.is_none()
        {
            return Ok(());
        }
        update_mgr.publish_primary_key_tablet(
            op_write,
            txn_id,
            &mut self.metadata,
            &self.tablet,
            &entry,
            self.builder.as_mut(),
            self.base_version,
        )
    }

    fn apply_compaction_log(
        &mut self,
        op_compaction: &OpCompaction,
        txn_id: TxnId,
    ) -> ApplierResult<()> {
        let update_mgr = Arc::clone(self.tablet.update_mgr());
        let _shard_lock = ShardLockGuard::lock(update_mgr.as_ref(), self.tablet.id());

        let entry = self.prepare_index_once(update_mgr.as_ref())?;

        if op_compaction.input_rowsets.is_empty() {
            debug_assert!(op_compaction.effective_output().is_none());
            return Ok(());
        }
        update_mgr.publish_primary_compaction(
            op_compaction,
            txn_id,
            &mut self.metadata,
            &self.tablet,
            &entry,
            self.builder.as_mut(),
            self.base_version,
        )
    }

    fn apply_schema_change_log(&mut self, op_schema_change: &OpSchemaChange) -> ApplierResult<()> {
        debug_assert_eq!(1, self.base_version);
        debug_assert_eq!(0, self.metadata.rowsets.len());
        for rowset in &op_schema_change.rowsets {
            self.metadata.next_rowset_id = rowset.id + rowset.id_slots();
            self.metadata.rowsets.push(rowset.clone());
        }
        if let Some(delvec_meta) = &op_schema_change.delvec_meta {
            debug_assert!(op_schema_change.linked_segment);
            self.metadata.delvec_meta = delvec_meta.clone();
        }
        // More logs follow the schema change in this batch; they must be
        // applied in the new schema, so persist an intermediate snapshot
        // at the alter version and rebase on it.
        if op_schema_change.alter_version + 1 < self.new_version {
            self.base_version = op_schema_change.alter_version;
            let mut base_meta = self.metadata.clone();
            base_meta.version = self.base_version;
            self.tablet.put_metadata(&base_meta)?;
        }
        Ok(())
    }

    fn apply_replication_log(
        &mut self,
        op_replication: &OpReplication,
        txn_id: TxnId,
    ) -> ApplierResult<()> {
        validate_replication_meta(op_replication, self.new_version)?;

        if op_replication.txn_meta.incremental_snapshot {
            debug_assert_eq!(
                self.new_version - self.base_version,
                op_replication.op_writes.len() as u64,
                "base_version: {}, new_version: {}",
                self.base_version,
                self.new_version
            );
            for op_write in &op_replication.op_writes {
                self.apply_write_log(op_write, txn_id)?;
            }
            log::info!(
                "Apply pk incremental replication log finish. tablet_id: {}, base_version: {}, new_version: {}, txn_id: {}",
                self.tablet.id(),
                self.base_version,
                self.new_version,
                txn_id
            );
        } else {
            let old_rowsets = std::mem::take(&mut self.metadata.rowsets);
            self.metadata.delvec_meta.clear();

            // Source and destination rowset id spaces are disjoined by
            // offsetting with the pre-replication allocator value.
            let base_rowset_id = self.metadata.next_rowset_id;
            let mut new_next_rowset_id = base_rowset_id;
            for op_write in &op_replication.op_writes {
                let mut rowset = op_write.rowset.clone();
                rowset.id += base_rowset_id;
                new_next_rowset_id = new_next_rowset_id.max(rowset.id + rowset.id_slots());
                self.metadata.rowsets.push(rowset);
            }

            for (&segment_id, payload) in &op_replication.delvecs {
                let delvec = DelVector::load(self.new_version, payload)?;
                self.builder.append_delvec(delvec, segment_id + base_rowset_id);
            }

            self.metadata.next_rowset_id = new_next_rowset_id;
            self.metadata.cumulative_point = 0;
            self.metadata.compaction_inputs = old_rowsets;

            // The replicated state supersedes whatever the index held; the
            // next write rebuilds it from scratch.
            self.tablet.update_mgr().unload_primary_index(self.tablet.id());

            log::info!(
                "Apply pk full replication log finish. tablet_id: {}, base_version: {}, new_version: {}, txn_id: {}",
                self.tablet.id(),
                self.base_version,
                self.new_version,
                txn_id
            );
        }

        if let Some(schema) = &op_replication.source_schema {
            self.metadata.source_schema = Some(schema.clone());
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn metadata(&self) -> &TabletMetadata {
        &self.metadata
    }
}

impl Drop for PrimaryKeyApplier {
    fn drop(&mut self) {
        let Some(HeldIndex { entry, guard }) = self.index.take() else {
            return;
        };
        let update_mgr = Arc::clone(self.tablet.update_mgr());
        if self.has_finalized {
            update_mgr.release_primary_index_cache(entry);
        } else {
            // Failed before finalize: unload the index first, then release
            // the pin, then evict the cache entry so a retry rebuilds from
            // the base version.
            entry.index().unload();
            drop(guard);
            update_mgr.remove_primary_index_cache(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        create_test_metadata, create_test_rowset, create_test_tablet, CoreServices,
    };
    use lakedb_commons::models::KeysType;
    use lakedb_commons::TabletId;

    fn pk_applier(services: &CoreServices, version: u64, new_version: u64) -> PrimaryKeyApplier {
        let tablet = create_test_tablet(TabletId::new(77), services);
        let metadata = create_test_metadata(TabletId::new(77), version, KeysType::Primary);
        PrimaryKeyApplier::new(tablet, metadata, new_version, ApplierSettings::default())
    }

    #[test]
    fn test_version_stamped_eagerly() {
        let services = CoreServices::new();
        let applier = pk_applier(&services, 10, 11);
        assert_eq!(applier.metadata().version, 11);
        assert_eq!(applier.base_version, 10);
    }

    #[test]
    fn test_empty_write_prepares_index_but_skips_publish() {
        let services = CoreServices::new();
        let mut applier = pk_applier(&services, 10, 11);

        let op = OpWrite::new(create_test_rowset(0, 0, 0));
        applier.apply_write_log(&op, TxnId::new(1)).unwrap();

        assert_eq!(services.update_mgr.prepare_count(), 1);
        assert_eq!(services.update_mgr.publish_write_count(), 0);
        // shard lock balanced
        assert_eq!(services.update_mgr.shard_lock_balance(), 0);
    }

    #[test]
    fn test_index_prepared_once_across_logs() {
        let services = CoreServices::new();
        let mut applier = pk_applier(&services, 10, 12);

        for txn in 1..=2u64 {
            let op = OpWrite::new(create_test_rowset(0, 5, 1));
            applier.apply_write_log(&op, TxnId::new(txn)).unwrap();
        }
        assert_eq!(services.update_mgr.prepare_count(), 1);
        assert_eq!(services.update_mgr.publish_write_count(), 2);
    }

    #[test]
    fn test_drop_without_finish_evicts_index_entry() {
        let services = CoreServices::new();
        {
            let mut applier = pk_applier(&services, 10, 11);
            let op = OpWrite::new(create_test_rowset(0, 5, 1));
            applier.apply_write_log(&op, TxnId::new(1)).unwrap();
        }
        assert_eq!(services.update_mgr.remove_count(), 1);
        assert_eq!(services.update_mgr.release_count(), 0);
        assert!(services.update_mgr.index_unloaded(TabletId::new(77)));
        assert_eq!(services.update_mgr.guard_balance(), 0);
    }

    #[test]
    fn test_finish_releases_but_keeps_entry_resident() {
        let services = CoreServices::new();
        let mut applier = pk_applier(&services, 10, 11);
        let op = OpWrite::new(create_test_rowset(0, 5, 1));
        applier.apply_write_log(&op, TxnId::new(9)).unwrap();

        let metadata = applier.finish().unwrap();
        assert_eq!(metadata.version, 11);
        assert_eq!(services.update_mgr.release_count(), 1);
        assert_eq!(services.update_mgr.remove_count(), 0);
        assert_eq!(services.update_mgr.commit_count(), 1);
    }

    #[test]
    fn test_max_txn_id_tracks_every_log() {
        let services = CoreServices::new();
        let tablet = create_test_tablet(TabletId::new(77), &services);
        let metadata = create_test_metadata(TabletId::new(77), 10, KeysType::Primary);
        let mut applier =
            PrimaryKeyApplier::new(tablet, metadata, 11, ApplierSettings::default());

        let log = TxnLog::new(
            TabletId::new(77),
            TxnId::new(500),
            TxnOp::Write(OpWrite::new(create_test_rowset(0, 5, 1))),
        );
        applier.apply(&log).unwrap();
        assert_eq!(applier.max_txn_id, TxnId::new(500));
    }
}
