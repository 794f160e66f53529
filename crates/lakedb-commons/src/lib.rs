//! lakedb-commons
//!
//! Shared model types for LakeDB: typed identifiers, tablet metadata
//! documents, transaction logs and delete vectors. These types are
//! serialization-stable (serde + bincode) and carried across every crate
//! without pulling in engine logic.

pub mod delvec;
pub mod models;

pub use delvec::{DelVector, DelVectorError};
pub use models::{TabletId, TxnId};
