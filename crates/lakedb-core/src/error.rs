//! Error types for the tablet engine core.

use lakedb_commons::DelVectorError;
use thiserror::Error;

use crate::storage::StorageError;

/// Result alias used throughout the applier and its collaborators.
pub type ApplierResult<T> = Result<T, ApplierError>;

/// Errors that can occur while applying transaction logs.
///
/// The first error short-circuits the batch; the applier is not reusable
/// afterwards. The caller drops it (triggering cleanup) and retries from
/// the base version with a fresh instance.
#[derive(Debug, Error)]
pub enum ApplierError {
    /// Base version does not match the update manager's view; a concurrent
    /// writer raced this publication
    #[error("stale version: {0}")]
    VersionStale(String),

    /// A log carries state inconsistent with what was persisted
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// An applier invariant was violated
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O or cache failure surfaced from a collaborator
    #[error("transient: {0}")]
    Transient(String),
}

impl ApplierError {
    /// Create a VersionStale error
    pub fn version_stale(msg: impl Into<String>) -> Self {
        Self::VersionStale(msg.into())
    }

    /// Create a Corrupt error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create an Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a Transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

impl From<StorageError> for ApplierError {
    fn from(err: StorageError) -> Self {
        ApplierError::Transient(err.to_string())
    }
}

impl From<DelVectorError> for ApplierError {
    fn from(err: DelVectorError) -> Self {
        ApplierError::Corrupt(err.to_string())
    }
}
