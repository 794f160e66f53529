//! Rowset metadata model.
//!
//! A rowset is an immutable set of column-segment files produced by one
//! ingest or one compaction. Rowset ids are allocated from the owning
//! tablet's `next_rowset_id` counter and are unique within the tablet.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Predicate attached to a delete-by-condition mutation.
///
/// Kept as textual expressions; evaluation happens at read time and is not
/// the applier's concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct DeletePredicate {
    /// Conjunctive predicate expressions, e.g. `"ts < 1700000000"`
    pub expressions: Vec<String>,
}

/// Metadata of a single rowset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct RowsetMetadata {
    /// Rowset id, unique within the tablet
    pub id: u32,

    /// Ordered segment file names
    pub segments: Vec<String>,

    /// Total row count across segments
    pub num_rows: u64,

    /// Total on-disk size in bytes
    pub data_size: u64,

    /// True when segments have overlapping key ranges
    pub overlapped: bool,

    /// Delete-by-condition predicate, if this rowset carries one
    pub delete_predicate: Option<DeletePredicate>,
}

impl RowsetMetadata {
    /// Number of segments, but at least one id slot.
    ///
    /// A rowset with zero segments can still exist (a bare delete
    /// predicate), and it must still occupy one slot in the id space.
    pub fn id_slots(&self) -> u32 {
        std::cmp::max(1, self.segments.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_slots_min_one() {
        let empty = RowsetMetadata::default();
        assert_eq!(empty.id_slots(), 1);

        let two_segs = RowsetMetadata {
            segments: vec!["a.dat".to_string(), "b.dat".to_string()],
            ..Default::default()
        };
        assert_eq!(two_segs.id_slots(), 2);
    }
}
