//! Model types shared across LakeDB crates.

pub mod rowset;
pub mod schema;
pub mod tablet_id;
pub mod tablet_metadata;
pub mod txn_id;
pub mod txn_log;

pub use rowset::{DeletePredicate, RowsetMetadata};
pub use schema::{ColumnSchema, ColumnType, KeysType, TabletSchema};
pub use tablet_id::TabletId;
pub use tablet_metadata::{DelvecMeta, DelvecPage, TabletMetadata};
pub use txn_id::TxnId;
pub use txn_log::{
    MetadataUpdateInfo, OpAlterMetadata, OpCompaction, OpReplication, OpSchemaChange, OpWrite,
    ReplicationTxnMeta, ReplicationTxnState, TxnLog, TxnOp,
};
