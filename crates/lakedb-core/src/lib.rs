//! lakedb-core
//!
//! Tablet engine core: the transaction log applier that folds committed
//! transaction logs into the next versioned metadata snapshot, together
//! with the boundary traits it drives (update manager, metadata store,
//! meta-file builder, primary-key recovery).
//!
//! The applier is strictly synchronous and invoked serially per tablet;
//! cross-tablet concurrency is the caller's concern.

pub mod applier;
pub mod builder;
pub mod config;
pub mod error;
pub mod storage;
pub mod tablet;
pub mod test_helpers;
pub mod update;

pub use applier::{new_txn_log_applier, TxnLogApplier};
pub use builder::{MetaFileBuilder, RecoverFlag};
pub use config::ApplierSettings;
pub use error::{ApplierError, ApplierResult};
pub use tablet::Tablet;
