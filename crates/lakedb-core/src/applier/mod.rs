//! Transaction log appliers.
//!
//! Publication advances a tablet from version `V` to `V+1` by folding one
//! or more transaction logs into a new metadata snapshot. The applier is a
//! per-tablet, per-transition object with three lifecycle phases: `init`,
//! a serial sequence of `apply` calls, and a terminal `finish`. Dropping
//! an applier without finishing restores external shared state.
//!
//! Two variants implement the contract, selected by the tablet's key
//! model; the factory dispatches on the base metadata's schema.

mod alter_meta;
mod non_primary_key;
mod primary_key;

pub use non_primary_key::NonPrimaryKeyApplier;
pub use primary_key::PrimaryKeyApplier;

use lakedb_commons::models::{
    OpReplication, ReplicationTxnState, TabletMetadata, TxnLog,
};

use crate::config::ApplierSettings;
use crate::error::{ApplierError, ApplierResult};
use crate::tablet::Tablet;

/// A transaction log applier for one version transition of one tablet.
pub enum TxnLogApplier {
    /// Tablet with a live primary index
    PrimaryKey(PrimaryKeyApplier),
    /// Append-only tablet
    NonPrimaryKey(NonPrimaryKeyApplier),
}

impl TxnLogApplier {
    /// Validate the transition against the update manager's view. No
    /// index materialization happens here.
    pub fn init(&mut self) -> ApplierResult<()> {
        match self {
            TxnLogApplier::PrimaryKey(applier) => applier.init(),
            TxnLogApplier::NonPrimaryKey(applier) => applier.init(),
        }
    }

    /// Fold one transaction log into the pending snapshot.
    ///
    /// The first error poisons the applier; the caller drops it and
    /// retries from the base version with a fresh instance.
    pub fn apply(&mut self, log: &TxnLog) -> ApplierResult<()> {
        match self {
            TxnLogApplier::PrimaryKey(applier) => applier.apply(log),
            TxnLogApplier::NonPrimaryKey(applier) => applier.apply(log),
        }
    }

    /// Persist the new snapshot and hand it back.
    pub fn finish(self) -> ApplierResult<TabletMetadata> {
        match self {
            TxnLogApplier::PrimaryKey(applier) => applier.finish(),
            TxnLogApplier::NonPrimaryKey(applier) => applier.finish(),
        }
    }
}

/// Create the applier for one version transition.
///
/// The variant follows the key model recorded in the base metadata's
/// schema.
pub fn new_txn_log_applier(
    tablet: Tablet,
    metadata: TabletMetadata,
    new_version: u64,
    settings: ApplierSettings,
) -> TxnLogApplier {
    if metadata.schema.keys_type.is_primary() {
        TxnLogApplier::PrimaryKey(PrimaryKeyApplier::new(
            tablet,
            metadata,
            new_version,
            settings,
        ))
    } else {
        TxnLogApplier::NonPrimaryKey(NonPrimaryKeyApplier::new(
            tablet,
            metadata,
            new_version,
            settings,
        ))
    }
}

/// Validate a replication log's commit-time metadata against the version
/// being published. Shared by both applier variants.
pub(crate) fn validate_replication_meta(
    op_replication: &OpReplication,
    new_version: u64,
) -> ApplierResult<()> {
    let txn_meta = &op_replication.txn_meta;
    if txn_meta.txn_state != ReplicationTxnState::Replicated {
        log::warn!(
            "Fail to apply replication log, invalid txn meta state: {:?}",
            txn_meta.txn_state
        );
        return Err(ApplierError::corrupt(format!(
            "invalid replication txn state: {:?}",
            txn_meta.txn_state
        )));
    }
    if txn_meta.snapshot_version != new_version {
        log::warn!(
            "Fail to apply replication log, mismatched snapshot version and new version, snapshot version: {}, new version: {}",
            txn_meta.snapshot_version,
            new_version
        );
        return Err(ApplierError::corrupt(
            "mismatched snapshot version and new version",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_metadata, create_test_tablet, CoreServices};
    use lakedb_commons::models::{KeysType, ReplicationTxnMeta};
    use lakedb_commons::{TabletId, TxnId};
    use std::collections::BTreeMap;

    #[test]
    fn test_factory_selects_variant_by_keys_type() {
        let services = CoreServices::new();
        let tablet = create_test_tablet(TabletId::new(1), &services);

        let pk_meta = create_test_metadata(TabletId::new(1), 5, KeysType::Primary);
        let applier =
            new_txn_log_applier(tablet.clone(), pk_meta, 6, ApplierSettings::default());
        assert!(matches!(applier, TxnLogApplier::PrimaryKey(_)));

        for keys_type in [KeysType::Duplicate, KeysType::Aggregate, KeysType::Unique] {
            let meta = create_test_metadata(TabletId::new(1), 5, keys_type);
            let applier =
                new_txn_log_applier(tablet.clone(), meta, 6, ApplierSettings::default());
            assert!(matches!(applier, TxnLogApplier::NonPrimaryKey(_)));
        }
    }

    #[test]
    fn test_replication_meta_validation() {
        let op = OpReplication {
            txn_meta: ReplicationTxnMeta {
                txn_id: TxnId::new(1),
                txn_state: ReplicationTxnState::Prepared,
                snapshot_version: 13,
                incremental_snapshot: false,
            },
            op_writes: Vec::new(),
            delvecs: BTreeMap::new(),
            source_schema: None,
        };
        assert!(matches!(
            validate_replication_meta(&op, 13),
            Err(ApplierError::Corrupt(_))
        ));

        let mut replicated = op.clone();
        replicated.txn_meta.txn_state = ReplicationTxnState::Replicated;
        assert!(validate_replication_meta(&replicated, 13).is_ok());
        assert!(matches!(
            validate_replication_meta(&replicated, 14),
            Err(ApplierError::Corrupt(_))
        ));
    }
}
