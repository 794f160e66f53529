//! Transaction log applier for append-only tablets.
//!
//! Duplicate, aggregate and unique key tablets have no primary index, no
//! delete vectors and no recovery path; applying a log is pure metadata
//! surgery. The invariants live in compaction: input rowsets must be
//! physically adjacent in the rowset list, and the cumulative point is
//! recomputed from the position of the consumed range.

use lakedb_commons::models::{
    OpCompaction, OpReplication, OpSchemaChange, OpWrite, RowsetMetadata, TabletMetadata, TxnLog,
    TxnOp,
};

use crate::applier::alter_meta::apply_alter_meta_log;
use crate::applier::validate_replication_meta;
use crate::config::ApplierSettings;
use crate::error::{ApplierError, ApplierResult};
use crate::tablet::Tablet;

/// Applier for tablets without a primary index.
pub struct NonPrimaryKeyApplier {
    tablet: Tablet,
    metadata: TabletMetadata,
    new_version: u64,
    settings: ApplierSettings,
}

impl NonPrimaryKeyApplier {
    pub(crate) fn new(
        tablet: Tablet,
        metadata: TabletMetadata,
        new_version: u64,
        settings: ApplierSettings,
    ) -> Self {
        Self {
            tablet,
            metadata,
            new_version,
            settings,
        }
    }

    pub(crate) fn init(&mut self) -> ApplierResult<()> {
        Ok(())
    }

    pub(crate) fn apply(&mut self, log: &TxnLog) -> ApplierResult<()> {
        match &log.op {
            TxnOp::Write(op_write) => self.apply_write_log(op_write),
            TxnOp::Compaction(op_compaction) => self.apply_compaction_log(op_compaction),
            TxnOp::SchemaChange(op_schema_change) => {
                self.apply_schema_change_log(op_schema_change)
            }
            TxnOp::Replication(op_replication) => self.apply_replication_log(op_replication),
            TxnOp::AlterMetadata(op_alter_metadata) => apply_alter_meta_log(
                &mut self.metadata,
                op_alter_metadata,
                self.tablet.update_mgr().as_ref(),
            ),
        }
    }

    pub(crate) fn finish(mut self) -> ApplierResult<TabletMetadata> {
        self.metadata.version = self.new_version;
        self.tablet.put_metadata(&self.metadata)?;
        Ok(self.metadata)
    }

    fn apply_write_log(&mut self, op_write: &OpWrite) -> ApplierResult<()> {
        if op_write.rowset.num_rows > 0 || op_write.rowset.delete_predicate.is_some() {
            let mut rowset = op_write.rowset.clone();
            rowset.id = self.metadata.next_rowset_id;
            self.metadata.next_rowset_id += rowset.id_slots();
            self.metadata.rowsets.push(rowset);
        }
        Ok(())
    }

    fn apply_compaction_log(&mut self, op_compaction: &OpCompaction) -> ApplierResult<()> {
        // A compaction log without inputs is permitted: the planner found
        // at commit time that its inputs had already vanished.
        if op_compaction.input_rowsets.is_empty() {
            debug_assert!(op_compaction.effective_output().is_none());
            return Ok(());
        }

        let first_id = op_compaction.input_rowsets[0];
        let first_idx = self
            .metadata
            .rowsets
            .iter()
            .position(|r| r.id == first_id)
            .ok_or_else(|| {
                ApplierError::internal(format!("input rowset {first_id} not found"))
            })?;

        // Safety check:
        // 1. All input rowsets must exist in the rowset list.
        // 2. Their positions must be adjacent, in input order.
        let mut pre_input_idx = first_idx;
        for &input_id in &op_compaction.input_rowsets[1..] {
            match self.metadata.rowsets[pre_input_idx + 1..]
                .iter()
                .position(|r| r.id == input_id)
            {
                Some(0) => pre_input_idx += 1,
                Some(_) => {
                    return Err(ApplierError::internal("input rowset position not adjacent"))
                }
                None => {
                    return Err(ApplierError::internal(format!(
                        "input rowset {input_id} not exist"
                    )))
                }
            }
        }
        let end_idx = pre_input_idx + 1;

        let consumed: Vec<RowsetMetadata> =
            self.metadata.rowsets.drain(first_idx..end_idx).collect();

        let has_output = op_compaction.effective_output().is_some();
        if let Some(output) = op_compaction.effective_output() {
            let mut output_rowset = output.clone();
            output_rowset.id = self.metadata.next_rowset_id;
            self.metadata.next_rowset_id += output_rowset.segments.len() as u32;
            self.metadata.rowsets.insert(first_idx, output_rowset);
        }
        self.metadata.compaction_inputs.extend(consumed);

        // The size-tiered planner does not use the cumulative point.
        let mut new_cumulative_point = 0;
        if !self.settings.enable_size_tiered_compaction_strategy {
            let first_idx = first_idx as u32;
            let num_inputs = op_compaction.input_rowsets.len() as u32;
            if first_idx >= self.metadata.cumulative_point {
                // cumulative compaction
                new_cumulative_point = first_idx;
            } else if self.metadata.cumulative_point >= num_inputs {
                // base compaction
                new_cumulative_point = self.metadata.cumulative_point - num_inputs;
            }
            if has_output {
                new_cumulative_point += 1;
            }
            if new_cumulative_point as usize > self.metadata.rowsets.len() {
                return Err(ApplierError::internal(format!(
                    "new cumulative point: {} exceeds rowset count: {}",
                    new_cumulative_point,
                    self.metadata.rowsets.len()
                )));
            }
        }
        self.metadata.cumulative_point = new_cumulative_point;

        let rowset_ids: Vec<u32> = self.metadata.rowsets.iter().map(|r| r.id).collect();
        let delete_rowset_ids: Vec<u32> = self
            .metadata
            .rowsets
            .iter()
            .filter(|r| r.delete_predicate.is_some())
            .map(|r| r.id)
            .collect();
        log::info!(
            "Compaction finish. tablet: {}, version: {}, cumulative point: {}, rowsets: {:?}, delete rowsets: {:?}",
            self.metadata.tablet_id,
            self.metadata.version,
            self.metadata.cumulative_point,
            rowset_ids,
            delete_rowset_ids
        );
        Ok(())
    }

    fn apply_schema_change_log(&mut self, op_schema_change: &OpSchemaChange) -> ApplierResult<()> {
        debug_assert_eq!(0, self.metadata.rowsets.len());
        for rowset in &op_schema_change.rowsets {
            self.metadata.next_rowset_id = rowset.id + rowset.id_slots();
            self.metadata.rowsets.push(rowset.clone());
        }
        debug_assert!(op_schema_change.delvec_meta.is_none());
        Ok(())
    }

    fn apply_replication_log(&mut self, op_replication: &OpReplication) -> ApplierResult<()> {
        validate_replication_meta(op_replication, self.new_version)?;

        if op_replication.txn_meta.incremental_snapshot {
            for op_write in &op_replication.op_writes {
                self.apply_write_log(op_write)?;
            }
            log::info!(
                "Apply incremental replication log finish. tablet_id: {}, base_version: {}, new_version: {}, txn_id: {}",
                self.tablet.id(),
                self.metadata.version,
                self.new_version,
                op_replication.txn_meta.txn_id
            );
        } else {
            let old_rowsets = std::mem::take(&mut self.metadata.rowsets);

            for op_write in &op_replication.op_writes {
                self.apply_write_log(op_write)?;
            }

            self.metadata.cumulative_point = 0;
            self.metadata.compaction_inputs = old_rowsets;

            log::info!(
                "Apply full replication log finish. tablet_id: {}, base_version: {}, new_version: {}, txn_id: {}",
                self.tablet.id(),
                self.metadata.version,
                self.new_version,
                op_replication.txn_meta.txn_id
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        create_test_metadata, create_test_rowset, create_test_tablet, CoreServices,
    };
    use lakedb_commons::models::KeysType;
    use lakedb_commons::TabletId;

    fn applier_with_rowsets(
        rowset_ids: &[u32],
        cumulative_point: u32,
        settings: ApplierSettings,
    ) -> NonPrimaryKeyApplier {
        let services = CoreServices::new();
        let tablet = create_test_tablet(TabletId::new(10), &services);
        let mut metadata = create_test_metadata(TabletId::new(10), 9, KeysType::Duplicate);
        for &id in rowset_ids {
            metadata.rowsets.push(create_test_rowset(id, 10, 1));
        }
        metadata.next_rowset_id = rowset_ids.iter().max().copied().unwrap_or(0) + 1;
        metadata.cumulative_point = cumulative_point;
        NonPrimaryKeyApplier::new(tablet, metadata, 10, settings)
    }

    #[test]
    fn test_compaction_without_inputs_is_noop() {
        let mut applier = applier_with_rowsets(&[1, 2], 0, ApplierSettings::default());
        let before = applier.metadata().clone();

        applier
            .apply_compaction_log(&OpCompaction::default())
            .unwrap();
        assert_eq!(applier.metadata(), &before);
    }

    #[test]
    fn test_base_compaction_moves_cumulative_point_back() {
        // rowsets [1,2,3,4], point 3; compacting [1,2] is a base compaction
        let mut applier = applier_with_rowsets(&[1, 2, 3, 4], 3, ApplierSettings::default());
        let op = OpCompaction {
            input_rowsets: vec![1, 2],
            output_rowset: Some(create_test_rowset(0, 50, 1)),
        };
        applier.apply_compaction_log(&op).unwrap();

        // point: 3 - 2 inputs + 1 output = 2
        assert_eq!(applier.metadata().cumulative_point, 2);
        let ids: Vec<u32> = applier.metadata().rowsets.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 3, 4]);
    }

    #[test]
    fn test_pure_deletion_compaction_erases_range() {
        let mut applier = applier_with_rowsets(&[1, 2, 3], 0, ApplierSettings::default());
        let op = OpCompaction {
            input_rowsets: vec![2, 3],
            output_rowset: None,
        };
        applier.apply_compaction_log(&op).unwrap();

        let ids: Vec<u32> = applier.metadata().rowsets.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(applier.metadata().cumulative_point, 1);
        assert_eq!(applier.metadata().compaction_inputs.len(), 2);
    }

    #[test]
    fn test_size_tiered_strategy_resets_cumulative_point() {
        let settings = ApplierSettings {
            enable_size_tiered_compaction_strategy: true,
            ..Default::default()
        };
        let mut applier = applier_with_rowsets(&[1, 2, 3, 4], 3, settings);
        let op = OpCompaction {
            input_rowsets: vec![3, 4],
            output_rowset: Some(create_test_rowset(0, 50, 1)),
        };
        applier.apply_compaction_log(&op).unwrap();
        assert_eq!(applier.metadata().cumulative_point, 0);
    }

    #[test]
    fn test_missing_first_input_fails() {
        let mut applier = applier_with_rowsets(&[1, 2], 0, ApplierSettings::default());
        let op = OpCompaction {
            input_rowsets: vec![9],
            output_rowset: None,
        };
        let err = applier.apply_compaction_log(&op).unwrap_err();
        assert!(matches!(err, ApplierError::Internal(_)));
    }

    #[test]
    fn test_write_with_zero_rows_and_no_predicate_is_skipped() {
        let mut applier = applier_with_rowsets(&[], 0, ApplierSettings::default());
        applier
            .apply_write_log(&OpWrite::new(create_test_rowset(0, 0, 1)))
            .unwrap();
        assert!(applier.metadata().rowsets.is_empty());
    }
}
