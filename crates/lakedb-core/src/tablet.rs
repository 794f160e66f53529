//! Tablet handle.
//!
//! A cheap, cloneable handle bundling a tablet id with the collaborators
//! the applier reaches through it: the update manager, the metadata store
//! and the primary-key recovery routine.

use std::sync::Arc;

use lakedb_commons::models::TabletMetadata;
use lakedb_commons::TabletId;

use crate::builder::MetaFileBuilder;
use crate::error::ApplierResult;
use crate::storage::MetadataStore;
use crate::update::{PrimaryKeyRecover, UpdateManager};

/// Handle to one tablet.
#[derive(Clone)]
pub struct Tablet {
    id: TabletId,
    update_mgr: Arc<dyn UpdateManager>,
    metadata_store: Arc<dyn MetadataStore>,
    pk_recover: Arc<dyn PrimaryKeyRecover>,
}

impl Tablet {
    /// Create a tablet handle
    pub fn new(
        id: TabletId,
        update_mgr: Arc<dyn UpdateManager>,
        metadata_store: Arc<dyn MetadataStore>,
        pk_recover: Arc<dyn PrimaryKeyRecover>,
    ) -> Self {
        Self {
            id,
            update_mgr,
            metadata_store,
            pk_recover,
        }
    }

    /// Tablet id
    pub fn id(&self) -> TabletId {
        self.id
    }

    /// The update manager serving this tablet
    pub fn update_mgr(&self) -> &Arc<dyn UpdateManager> {
        &self.update_mgr
    }

    /// The metadata store backing this tablet
    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata_store
    }

    /// Persist a metadata snapshot at its embedded version
    pub fn put_metadata(&self, metadata: &TabletMetadata) -> ApplierResult<()> {
        self.metadata_store.put_metadata(metadata)?;
        Ok(())
    }

    /// Create a meta-file builder finalizing into this tablet's store
    pub fn new_builder(&self) -> Box<dyn MetaFileBuilder> {
        self.metadata_store.new_builder(self.id)
    }

    /// The primary-key recovery routine for this tablet
    pub fn pk_recover(&self) -> &dyn PrimaryKeyRecover {
        self.pk_recover.as_ref()
    }
}
