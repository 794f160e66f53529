//! Metadata persistence boundary.
//!
//! The applier never performs object-store I/O itself; it goes through
//! `MetadataStore`. The crate ships `MemoryMetadataStore`, a DashMap-backed
//! implementation storing snapshots as JSON documents, which backs the test
//! suites and embedded usage. Production deployments plug in an object-store
//! backend behind the same trait.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

use lakedb_commons::models::{DelvecPage, TabletMetadata};
use lakedb_commons::{DelVector, TabletId, TxnId};

use crate::builder::{MetaFileBuilder, RecoverFlag};
use crate::error::ApplierResult;

/// Errors that can occur at the metadata-store boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic I/O failure from the underlying store
    #[error("I/O error: {0}")]
    Io(String),

    /// Snapshot could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Requested document does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

/// Persistence capabilities the applier consumes.
pub trait MetadataStore: Send + Sync {
    /// Persist a metadata snapshot at its embedded version
    fn put_metadata(&self, metadata: &TabletMetadata) -> Result<(), StorageError>;

    /// Fetch a metadata snapshot, if present
    fn get_metadata(
        &self,
        tablet_id: TabletId,
        version: u64,
    ) -> Result<Option<TabletMetadata>, StorageError>;

    /// Persist a delete-vector file
    fn put_delvec_file(
        &self,
        tablet_id: TabletId,
        file_name: &str,
        payload: &[u8],
    ) -> Result<(), StorageError>;

    /// Create a builder that finalizes into this store
    fn new_builder(&self, tablet_id: TabletId) -> Box<dyn MetaFileBuilder>;
}

#[derive(Default)]
struct StoreInner {
    /// (tablet id, version) to JSON snapshot document
    metadata: DashMap<(u64, u64), Vec<u8>>,

    /// (tablet id, file name) to delvec file payload
    delvec_files: DashMap<(u64, String), Vec<u8>>,
}

/// In-memory metadata store.
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    inner: Arc<StoreInner>,
}

impl MemoryMetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted snapshots across all tablets
    pub fn snapshot_count(&self) -> usize {
        self.inner.metadata.len()
    }

    /// Names of the delvec files persisted for a tablet, sorted
    pub fn delvec_file_names(&self, tablet_id: TabletId) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .delvec_files
            .iter()
            .filter(|e| e.key().0 == tablet_id.as_u64())
            .map(|e| e.key().1.clone())
            .collect();
        names.sort();
        names
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn put_metadata(&self, metadata: &TabletMetadata) -> Result<(), StorageError> {
        let doc = serde_json::to_vec(metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        // insert replaces atomically; readers see the old or the new
        // document, never a partial one
        self.inner
            .metadata
            .insert((metadata.tablet_id.as_u64(), metadata.version), doc);
        Ok(())
    }

    fn get_metadata(
        &self,
        tablet_id: TabletId,
        version: u64,
    ) -> Result<Option<TabletMetadata>, StorageError> {
        match self.inner.metadata.get(&(tablet_id.as_u64(), version)) {
            Some(doc) => {
                let metadata = serde_json::from_slice(doc.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(metadata))
            }
            None => Ok(None),
        }
    }

    fn put_delvec_file(
        &self,
        tablet_id: TabletId,
        file_name: &str,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        self.inner
            .delvec_files
            .insert((tablet_id.as_u64(), file_name.to_string()), payload.to_vec());
        Ok(())
    }

    fn new_builder(&self, tablet_id: TabletId) -> Box<dyn MetaFileBuilder> {
        Box::new(TabletMetaBuilder {
            store: self.clone(),
            tablet_id,
            delvecs: Vec::new(),
            recover_flag: RecoverFlag::Ok,
        })
    }
}

/// Builder finalizing into a `MemoryMetadataStore`.
pub struct TabletMetaBuilder {
    store: MemoryMetadataStore,
    tablet_id: TabletId,
    delvecs: Vec<(u32, DelVector)>,
    recover_flag: RecoverFlag,
}

impl MetaFileBuilder for TabletMetaBuilder {
    fn append_delvec(&mut self, delvec: DelVector, segment_id: u32) {
        self.delvecs.push((segment_id, delvec));
    }

    fn finalize(&mut self, metadata: &mut TabletMetadata, max_txn_id: TxnId) -> ApplierResult<()> {
        if !self.delvecs.is_empty() {
            // One delvec file per transition, prefixed with the largest txn
            // id folded in, so a retried transition writes a fresh name.
            let file_name = format!("{:016x}.delvec", max_txn_id.as_u64());
            let mut payload = Vec::new();
            for (segment_id, delvec) in self.delvecs.drain(..) {
                let bytes = delvec.save();
                metadata.delvec_meta.pages.insert(
                    segment_id,
                    DelvecPage {
                        version: metadata.version,
                        offset: payload.len() as u32,
                        size: bytes.len() as u32,
                    },
                );
                payload.extend_from_slice(&bytes);
            }
            metadata
                .delvec_meta
                .files
                .insert(metadata.version, file_name.clone());
            self.store
                .put_delvec_file(self.tablet_id, &file_name, &payload)?;
        }
        self.store.put_metadata(metadata)?;
        Ok(())
    }

    fn recover_flag(&self) -> RecoverFlag {
        self.recover_flag
    }

    fn set_recover_flag(&mut self, flag: RecoverFlag) {
        self.recover_flag = flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakedb_commons::models::TabletSchema;

    #[test]
    fn test_put_get_round_trip() {
        let store = MemoryMetadataStore::new();
        let meta = TabletMetadata::new(TabletId::new(1), TabletSchema::default(), 4);

        store.put_metadata(&meta).unwrap();
        let fetched = store.get_metadata(TabletId::new(1), 4).unwrap().unwrap();
        assert_eq!(meta, fetched);

        assert!(store.get_metadata(TabletId::new(1), 5).unwrap().is_none());
    }

    #[test]
    fn test_builder_finalize_writes_delvec_file_and_pages() {
        let store = MemoryMetadataStore::new();
        let tablet_id = TabletId::new(2);
        let mut meta = TabletMetadata::new(tablet_id, TabletSchema::default(), 8);

        let mut builder = store.new_builder(tablet_id);
        let mut delvec = DelVector::new(8);
        delvec.mark_deleted(17);
        builder.append_delvec(delvec, 3);
        builder.finalize(&mut meta, TxnId::new(0x2a)).unwrap();

        let files = store.delvec_file_names(tablet_id);
        assert_eq!(files, vec!["000000000000002a.delvec".to_string()]);

        let page = meta.delvec_meta.pages.get(&3).unwrap();
        assert_eq!(page.version, 8);
        assert_eq!(page.offset, 0);
        assert!(page.size > 0);

        // snapshot landed too
        assert!(store.get_metadata(tablet_id, 8).unwrap().is_some());
    }

    #[test]
    fn test_builder_finalize_without_delvecs_only_persists_metadata() {
        let store = MemoryMetadataStore::new();
        let tablet_id = TabletId::new(3);
        let mut meta = TabletMetadata::new(tablet_id, TabletSchema::default(), 2);

        let mut builder = store.new_builder(tablet_id);
        builder.finalize(&mut meta, TxnId::new(1)).unwrap();

        assert!(store.delvec_file_names(tablet_id).is_empty());
        assert!(meta.delvec_meta.is_empty());
        assert_eq!(store.snapshot_count(), 1);
    }
}
