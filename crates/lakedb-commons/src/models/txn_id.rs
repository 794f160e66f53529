//! Transaction identifier type

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a committed transaction.
///
/// Ids are assigned by the frontend in commit order, so the maximum txn id
/// seen while publishing a version transition is usable as a monotonically
/// increasing file-name prefix.
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
pub struct TxnId(u64);

impl TxnId {
    /// Create a new transaction id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TxnId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
