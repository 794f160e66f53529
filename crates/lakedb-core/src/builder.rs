//! Meta-file builder boundary.
//!
//! The builder accumulates the side effects of one version transition
//! (delete vectors produced by publication) and finalizes the metadata
//! artifact. The applier drives it; the persistence layer implements it.

use lakedb_commons::models::TabletMetadata;
use lakedb_commons::{DelVector, TxnId};

use crate::error::ApplierResult;

/// Outcome flag the publication path leaves on the builder when it detects
/// corruption that primary-key recovery can repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecoverFlag {
    /// Publication succeeded or failed without a recoverable cause
    #[default]
    Ok,
    /// Recover, then treat the log as already applied
    Recover,
    /// Recover, then publish the log again (duplicate primary key found
    /// while preparing the index)
    RecoverWithPublish,
}

/// Accumulates delete vectors and finalizes the next metadata snapshot.
pub trait MetaFileBuilder: Send {
    /// Record a delete vector for the given segment; written out on
    /// finalize
    fn append_delvec(&mut self, delvec: DelVector, segment_id: u32);

    /// Persist the delete vectors and the metadata snapshot.
    ///
    /// `max_txn_id` is the largest transaction id folded into this version
    /// transition; it prefixes the delvec file name so retries of the same
    /// transition never reuse a name.
    fn finalize(&mut self, metadata: &mut TabletMetadata, max_txn_id: TxnId) -> ApplierResult<()>;

    /// Current recovery flag
    fn recover_flag(&self) -> RecoverFlag;

    /// Reset or raise the recovery flag
    fn set_recover_flag(&mut self, flag: RecoverFlag);
}
