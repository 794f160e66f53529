//! Tablet identifier type
//!
//! Each tablet is a horizontal shard of a table and owns its own metadata
//! history. The id is assigned at tablet creation and never reused.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a tablet.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Encode,
    Decode,
)]
pub struct TabletId(u64);

impl TabletId {
    /// Create a new tablet id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TabletId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
