//! Transaction log models.
//!
//! A transaction log records the mutation a committed transaction intends
//! for one tablet. Each log carries exactly one operation; the operation
//! kinds form a closed sum type and the applier dispatches on it with an
//! exhaustive match.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rowset::RowsetMetadata;
use super::schema::TabletSchema;
use super::tablet_id::TabletId;
use super::tablet_metadata::DelvecMeta;
use super::txn_id::TxnId;

/// A transaction log for one tablet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TxnLog {
    /// Tablet the mutation targets
    pub tablet_id: TabletId,

    /// Committing transaction
    pub txn_id: TxnId,

    /// The mutation itself
    pub op: TxnOp,
}

impl TxnLog {
    /// Create a log carrying the given operation
    pub fn new(tablet_id: TabletId, txn_id: TxnId, op: TxnOp) -> Self {
        Self {
            tablet_id,
            txn_id,
            op,
        }
    }
}

/// The operation kinds a transaction log can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum TxnOp {
    /// Ingest of one rowset
    Write(OpWrite),
    /// Replacement of adjacent rowsets with their merged output
    Compaction(OpCompaction),
    /// Rowsets rewritten under a new schema at tablet creation
    SchemaChange(OpSchemaChange),
    /// In-place metadata alterations
    AlterMetadata(OpAlterMetadata),
    /// State replicated from another tablet
    Replication(OpReplication),
}

/// Ingest of one rowset, with optional row-level deletes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct OpWrite {
    /// The rowset produced by the write
    pub rowset: RowsetMetadata,

    /// Delete-payload file names recorded by the writer (primary-key
    /// tablets only)
    pub dels: Vec<String>,
}

impl OpWrite {
    /// Create a write op for the given rowset
    pub fn new(rowset: RowsetMetadata) -> Self {
        Self {
            rowset,
            dels: Vec::new(),
        }
    }
}

/// Replacement of a run of adjacent rowsets with their merged output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct OpCompaction {
    /// Ids of the consumed rowsets, in rowset-list order
    pub input_rowsets: Vec<u32>,

    /// Merged output; absent (or zero rows) for a pure deletion compaction
    pub output_rowset: Option<RowsetMetadata>,
}

impl OpCompaction {
    /// The output rowset, if one with actual rows was emitted
    pub fn effective_output(&self) -> Option<&RowsetMetadata> {
        self.output_rowset.as_ref().filter(|r| r.num_rows > 0)
    }
}

/// Rowsets rewritten under a new schema.
///
/// Only ever the first mutation of a freshly created tablet; rowset ids
/// are pre-assigned by the schema-change writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct OpSchemaChange {
    /// Version the alter job ran against
    pub alter_version: u64,

    /// Rewritten rowsets with pre-assigned ids
    pub rowsets: Vec<RowsetMetadata>,

    /// Delete vectors carried over from the source tablet; only valid
    /// together with `linked_segment`
    pub delvec_meta: Option<DelvecMeta>,

    /// True when segments were hard-linked rather than rewritten
    pub linked_segment: bool,
}

/// One metadata alteration entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct MetadataUpdateInfo {
    /// New persistent-index setting, if it changes
    pub enable_persistent_index: Option<bool>,

    /// Replacement schema, if it changes
    pub tablet_schema: Option<TabletSchema>,
}

/// In-place metadata alterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct OpAlterMetadata {
    /// Alterations applied in order
    pub metadata_update_infos: Vec<MetadataUpdateInfo>,
}

/// State of a replication transaction at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationTxnState {
    /// Snapshot requested but not yet transferred
    Prepared,
    /// Snapshot fully transferred; the log is applyable
    Replicated,
    /// Replication abandoned
    Aborted,
}

/// Commit-time metadata of a replication transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct ReplicationTxnMeta {
    /// The replication transaction
    pub txn_id: TxnId,

    /// Must be `Replicated` for the log to apply
    pub txn_state: ReplicationTxnState,

    /// Source snapshot version; must equal the version being published
    pub snapshot_version: u64,

    /// True for an incremental snapshot (a sequence of writes), false for
    /// a full snapshot replacing the tablet state
    pub incremental_snapshot: bool,
}

/// State replicated from another tablet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct OpReplication {
    /// Commit-time transaction metadata
    pub txn_meta: ReplicationTxnMeta,

    /// The contained writes, in source order
    pub op_writes: Vec<OpWrite>,

    /// Serialized delete vectors keyed by source segment id (full
    /// snapshots only)
    pub delvecs: BTreeMap<u32, Vec<u8>>,

    /// Schema of the source tablet, copied into the target metadata
    pub source_schema: Option<TabletSchema>,
}
