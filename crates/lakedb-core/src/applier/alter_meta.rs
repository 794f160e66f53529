//! Shared alter-metadata handling.

use lakedb_commons::models::{OpAlterMetadata, TabletMetadata};

use crate::error::ApplierResult;
use crate::update::UpdateManager;

/// Apply metadata alterations in place. Shared by both applier variants.
pub(crate) fn apply_alter_meta_log(
    metadata: &mut TabletMetadata,
    op_alter_metas: &OpAlterMetadata,
    update_mgr: &dyn UpdateManager,
) -> ApplierResult<()> {
    for alter_meta in &op_alter_metas.metadata_update_infos {
        if let Some(enable) = alter_meta.enable_persistent_index {
            metadata.enable_persistent_index = enable;
            update_mgr.set_enable_persistent_index(metadata.tablet_id, enable);
            // Eviction fails while another applier has the index pinned;
            // it is evicted when that applier finishes.
            let _ = update_mgr.index_cache().try_remove_by_key(metadata.tablet_id);
        }
        if let Some(schema) = &alter_meta.tablet_schema {
            log::debug!(
                "tablet {}: replacing schema {} with schema {}",
                metadata.tablet_id,
                metadata.schema.id,
                schema.id
            );
            metadata.schema = schema.clone();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_metadata, MockUpdateManager};
    use lakedb_commons::models::{KeysType, MetadataUpdateInfo, TabletSchema};
    use lakedb_commons::TabletId;

    #[test]
    fn test_persistent_index_toggle_notifies_and_evicts() {
        let update_mgr = MockUpdateManager::new();
        let mut metadata = create_test_metadata(TabletId::new(5), 3, KeysType::Primary);

        let op = OpAlterMetadata {
            metadata_update_infos: vec![MetadataUpdateInfo {
                enable_persistent_index: Some(true),
                tablet_schema: None,
            }],
        };
        apply_alter_meta_log(&mut metadata, &op, &update_mgr).unwrap();

        assert!(metadata.enable_persistent_index);
        assert_eq!(
            update_mgr.persistent_index_setting(TabletId::new(5)),
            Some(true)
        );
        assert_eq!(update_mgr.cache_try_remove_count(), 1);
    }

    #[test]
    fn test_schema_swap_replaces_in_place() {
        let update_mgr = MockUpdateManager::new();
        let mut metadata = create_test_metadata(TabletId::new(5), 3, KeysType::Duplicate);
        let old_schema_id = metadata.schema.id;

        let new_schema = TabletSchema {
            id: old_schema_id + 1,
            keys_type: KeysType::Duplicate,
            columns: Vec::new(),
        };
        let op = OpAlterMetadata {
            metadata_update_infos: vec![MetadataUpdateInfo {
                enable_persistent_index: None,
                tablet_schema: Some(new_schema.clone()),
            }],
        };
        apply_alter_meta_log(&mut metadata, &op, &update_mgr).unwrap();

        assert_eq!(metadata.schema, new_schema);
        // no index interaction for a pure schema swap
        assert_eq!(update_mgr.cache_try_remove_count(), 0);
    }
}
