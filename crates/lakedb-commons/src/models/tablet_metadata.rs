//! Tablet metadata document.
//!
//! The versioned snapshot of a tablet: the rowsets forming the current
//! state, the rowset-id allocator, the compaction bookkeeping and, for
//! primary-key tablets, the delete-vector locators. Publication advances a
//! tablet from version `V` to `V+1` by folding transaction logs into a new
//! snapshot of this document.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rowset::RowsetMetadata;
use super::schema::TabletSchema;
use super::tablet_id::TabletId;

/// Locator of one delete-vector page inside a delvec file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct DelvecPage {
    /// Version the delete vector was produced at
    pub version: u64,

    /// Byte offset within the delvec file
    pub offset: u32,

    /// Byte length of the serialized delete vector
    pub size: u32,
}

/// Delete-vector bookkeeping for a primary-key tablet.
///
/// Empty for non-primary-key tablets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct DelvecMeta {
    /// Version to delvec file name
    pub files: BTreeMap<u64, String>,

    /// Segment id to delete-vector locator
    pub pages: BTreeMap<u32, DelvecPage>,
}

impl DelvecMeta {
    /// True when no delete vectors are tracked
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.pages.is_empty()
    }

    /// Drop all tracked delete vectors
    pub fn clear(&mut self) {
        self.files.clear();
        self.pages.clear();
    }
}

/// The versioned metadata snapshot of a tablet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TabletMetadata {
    /// Owning tablet
    pub tablet_id: TabletId,

    /// Snapshot version, monotonic
    pub version: u64,

    /// Monotonic allocator for rowset ids local to this tablet
    pub next_rowset_id: u32,

    /// Boundary in `rowsets` between base-compacted (prefix) and
    /// cumulative-compacted (suffix) rowsets
    pub cumulative_point: u32,

    /// Rowsets forming this snapshot; order is significant
    pub rowsets: Vec<RowsetMetadata>,

    /// Rowsets consumed by compaction in this version, kept for GC
    pub compaction_inputs: Vec<RowsetMetadata>,

    /// Current column layout
    pub schema: TabletSchema,

    /// Origin schema recorded after replication
    pub source_schema: Option<TabletSchema>,

    /// Delete-vector locators (primary-key tablets only)
    #[serde(default)]
    pub delvec_meta: DelvecMeta,

    /// Toggles the on-disk representation of the primary index
    #[serde(default)]
    pub enable_persistent_index: bool,
}

impl TabletMetadata {
    /// Create an empty snapshot at the given version
    pub fn new(tablet_id: TabletId, schema: TabletSchema, version: u64) -> Self {
        Self {
            tablet_id,
            version,
            next_rowset_id: 1,
            schema,
            ..Default::default()
        }
    }

    /// Iterate the ids of every rowset referenced by this snapshot,
    /// including the ones parked in `compaction_inputs`
    pub fn all_rowset_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.rowsets
            .iter()
            .chain(self.compaction_inputs.iter())
            .map(|r| r.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::KeysType;

    #[test]
    fn test_new_snapshot_starts_clean() {
        let meta = TabletMetadata::new(TabletId::new(100), TabletSchema::default(), 1);
        assert_eq!(meta.version, 1);
        assert_eq!(meta.next_rowset_id, 1);
        assert_eq!(meta.cumulative_point, 0);
        assert!(meta.rowsets.is_empty());
        assert!(meta.compaction_inputs.is_empty());
        assert!(meta.delvec_meta.is_empty());
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let mut meta = TabletMetadata::new(TabletId::new(42), TabletSchema::default(), 3);
        meta.schema.keys_type = KeysType::Primary;
        meta.rowsets.push(RowsetMetadata {
            id: 1,
            segments: vec!["seg_1.dat".to_string()],
            num_rows: 10,
            ..Default::default()
        });
        meta.delvec_meta.pages.insert(
            1,
            DelvecPage {
                version: 3,
                offset: 0,
                size: 64,
            },
        );

        let json = serde_json::to_string(&meta).unwrap();
        let parsed: TabletMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, parsed);
    }
}
