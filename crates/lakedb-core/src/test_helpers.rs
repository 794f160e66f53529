//! Test helpers for lakedb-core: scripted mock collaborators and fixture
//! builders used by unit tests inside `src/**` and the integration tests
//! under `tests/`.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use lakedb_commons::models::{
    ColumnSchema, ColumnType, KeysType, OpCompaction, OpWrite, RowsetMetadata, TabletMetadata,
    TabletSchema,
};
use lakedb_commons::{DelVector, TabletId, TxnId};

use crate::builder::{MetaFileBuilder, RecoverFlag};
use crate::error::{ApplierError, ApplierResult};
use crate::storage::{MemoryMetadataStore, MetadataStore};
use crate::tablet::Tablet;
use crate::update::{
    IndexCache, IndexEntry, IndexEntryHandle, IndexGuard, PrimaryIndex, PrimaryKeyRecover,
    UpdateManager,
};

/// Shared counters and scripting state behind the mock update manager.
#[derive(Default)]
struct MockState {
    prepare_count: AtomicUsize,
    publish_write_count: AtomicUsize,
    publish_compaction_count: AtomicUsize,
    release_count: AtomicUsize,
    remove_count: AtomicUsize,
    unload_count: AtomicUsize,
    commit_count: AtomicUsize,
    cache_try_remove_count: AtomicUsize,
    shard_lock_balance: AtomicI64,
    guard_balance: AtomicI64,
    fail_version_check: AtomicBool,
    /// Recover flags handed to the next publish calls, front first
    scripted_flags: Mutex<VecDeque<RecoverFlag>>,
    persistent_index: Mutex<HashMap<u64, bool>>,
    unloaded: Mutex<HashSet<u64>>,
    last_object_size: Mutex<Option<u64>>,
}

struct MockPrimaryIndex {
    tablet_id: TabletId,
    state: Arc<MockState>,
}

impl PrimaryIndex for MockPrimaryIndex {
    fn commit(
        &self,
        _metadata: &TabletMetadata,
        _builder: &mut dyn MetaFileBuilder,
    ) -> ApplierResult<()> {
        self.state.commit_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unload(&self) {
        self.state.unloaded.lock().insert(self.tablet_id.as_u64());
    }

    fn memory_usage(&self) -> u64 {
        64
    }
}

struct MockGuard {
    state: Arc<MockState>,
}

impl IndexGuard for MockGuard {}

impl Drop for MockGuard {
    fn drop(&mut self) {
        self.state.guard_balance.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockIndexCache {
    state: Arc<MockState>,
}

impl IndexCache for MockIndexCache {
    fn try_remove_by_key(&self, _tablet_id: TabletId) -> bool {
        self.state
            .cache_try_remove_count
            .fetch_add(1, Ordering::SeqCst);
        true
    }

    fn update_object_size(&self, _entry: &IndexEntryHandle, bytes: u64) {
        *self.state.last_object_size.lock() = Some(bytes);
    }
}

/// Scripted update manager.
///
/// Publishes behave like the real ones as far as metadata is concerned
/// (rowsets appended or replaced, ids allocated); recover flags and
/// version-check failures are injected through the scripting methods.
pub struct MockUpdateManager {
    state: Arc<MockState>,
    cache: MockIndexCache,
}

impl Default for MockUpdateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpdateManager {
    pub fn new() -> Self {
        let state = Arc::new(MockState::default());
        let cache = MockIndexCache {
            state: Arc::clone(&state),
        };
        Self { state, cache }
    }

    /// Make the next `check_meta_version` fail with `VersionStale`
    pub fn fail_next_version_check(&self) {
        self.state.fail_version_check.store(true, Ordering::SeqCst);
    }

    /// Queue a recover flag for the next publish call
    pub fn script_recover_flag(&self, flag: RecoverFlag) {
        self.state.scripted_flags.lock().push_back(flag);
    }

    pub fn prepare_count(&self) -> usize {
        self.state.prepare_count.load(Ordering::SeqCst)
    }

    pub fn publish_write_count(&self) -> usize {
        self.state.publish_write_count.load(Ordering::SeqCst)
    }

    pub fn publish_compaction_count(&self) -> usize {
        self.state.publish_compaction_count.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.state.release_count.load(Ordering::SeqCst)
    }

    pub fn remove_count(&self) -> usize {
        self.state.remove_count.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.state.unload_count.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.state.commit_count.load(Ordering::SeqCst)
    }

    pub fn cache_try_remove_count(&self) -> usize {
        self.state.cache_try_remove_count.load(Ordering::SeqCst)
    }

    /// Locks acquired minus locks released; zero when balanced
    pub fn shard_lock_balance(&self) -> i64 {
        self.state.shard_lock_balance.load(Ordering::SeqCst)
    }

    /// Guards issued minus guards dropped; zero when balanced
    pub fn guard_balance(&self) -> i64 {
        self.state.guard_balance.load(Ordering::SeqCst)
    }

    pub fn persistent_index_setting(&self, tablet_id: TabletId) -> Option<bool> {
        self.state
            .persistent_index
            .lock()
            .get(&tablet_id.as_u64())
            .copied()
    }

    /// True when the tablet's index was unloaded, either through the
    /// entry or through `unload_primary_index`
    pub fn index_unloaded(&self, tablet_id: TabletId) -> bool {
        self.state.unloaded.lock().contains(&tablet_id.as_u64())
    }

    pub fn last_object_size(&self) -> Option<u64> {
        *self.state.last_object_size.lock()
    }

    /// Pop the scripted flag for a publish call; `Ok` when none queued
    fn next_flag(&self) -> RecoverFlag {
        self.state
            .scripted_flags
            .lock()
            .pop_front()
            .unwrap_or(RecoverFlag::Ok)
    }
}

impl UpdateManager for MockUpdateManager {
    fn check_meta_version(&self, tablet: &Tablet, base_version: u64) -> ApplierResult<()> {
        if self.state.fail_version_check.swap(false, Ordering::SeqCst) {
            return Err(ApplierError::version_stale(format!(
                "tablet {} base version {} raced a concurrent writer",
                tablet.id(),
                base_version
            )));
        }
        Ok(())
    }

    fn prepare_primary_index(
        &self,
        metadata: &TabletMetadata,
        _builder: &mut dyn MetaFileBuilder,
        _base_version: u64,
        _new_version: u64,
    ) -> ApplierResult<(IndexEntryHandle, Box<dyn IndexGuard>)> {
        self.state.prepare_count.fetch_add(1, Ordering::SeqCst);
        self.state.guard_balance.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(IndexEntry::new(
            metadata.tablet_id,
            Box::new(MockPrimaryIndex {
                tablet_id: metadata.tablet_id,
                state: Arc::clone(&self.state),
            }),
        ));
        let guard = Box::new(MockGuard {
            state: Arc::clone(&self.state),
        });
        Ok((entry, guard))
    }

    fn publish_primary_key_tablet(
        &self,
        op_write: &OpWrite,
        _txn_id: TxnId,
        metadata: &mut TabletMetadata,
        _tablet: &Tablet,
        _entry: &IndexEntryHandle,
        builder: &mut dyn MetaFileBuilder,
        _base_version: u64,
    ) -> ApplierResult<()> {
        self.state.publish_write_count.fetch_add(1, Ordering::SeqCst);
        let flag = self.next_flag();
        if flag != RecoverFlag::Ok {
            builder.set_recover_flag(flag);
            return Ok(());
        }
        let mut rowset = op_write.rowset.clone();
        rowset.id = metadata.next_rowset_id;
        metadata.next_rowset_id += rowset.id_slots();
        if !op_write.dels.is_empty() {
            let mut delvec = DelVector::new(metadata.version);
            delvec.mark_deleted(0);
            builder.append_delvec(delvec, rowset.id);
        }
        metadata.rowsets.push(rowset);
        Ok(())
    }

    fn publish_primary_compaction(
        &self,
        op_compaction: &OpCompaction,
        _txn_id: TxnId,
        metadata: &mut TabletMetadata,
        _tablet: &Tablet,
        _entry: &IndexEntryHandle,
        builder: &mut dyn MetaFileBuilder,
        _base_version: u64,
    ) -> ApplierResult<()> {
        self.state
            .publish_compaction_count
            .fetch_add(1, Ordering::SeqCst);
        let flag = self.next_flag();
        if flag != RecoverFlag::Ok {
            builder.set_recover_flag(flag);
            return Ok(());
        }
        let first_id = op_compaction.input_rowsets[0];
        let first_idx = metadata
            .rowsets
            .iter()
            .position(|r| r.id == first_id)
            .ok_or_else(|| {
                ApplierError::internal(format!("input rowset {first_id} not found"))
            })?;
        let end_idx = (first_idx + op_compaction.input_rowsets.len()).min(metadata.rowsets.len());
        let consumed: Vec<RowsetMetadata> = metadata.rowsets.drain(first_idx..end_idx).collect();
        if let Some(output) = op_compaction.effective_output() {
            let mut output_rowset = output.clone();
            output_rowset.id = metadata.next_rowset_id;
            metadata.next_rowset_id += output_rowset.segments.len() as u32;
            metadata.rowsets.insert(first_idx, output_rowset);
        }
        metadata.compaction_inputs.extend(consumed);
        Ok(())
    }

    fn lock_pk_index_shard(&self, _tablet_id: TabletId) {
        self.state.shard_lock_balance.fetch_add(1, Ordering::SeqCst);
    }

    fn unlock_pk_index_shard(&self, _tablet_id: TabletId) {
        self.state.shard_lock_balance.fetch_sub(1, Ordering::SeqCst);
    }

    fn release_primary_index_cache(&self, _entry: IndexEntryHandle) {
        self.state.release_count.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_primary_index_cache(&self, _entry: IndexEntryHandle) {
        self.state.remove_count.fetch_add(1, Ordering::SeqCst);
    }

    fn unload_primary_index(&self, tablet_id: TabletId) {
        self.state.unload_count.fetch_add(1, Ordering::SeqCst);
        self.state.unloaded.lock().insert(tablet_id.as_u64());
    }

    fn set_enable_persistent_index(&self, tablet_id: TabletId, enable: bool) {
        self.state
            .persistent_index
            .lock()
            .insert(tablet_id.as_u64(), enable);
    }

    fn index_cache(&self) -> &dyn IndexCache {
        &self.cache
    }
}

/// Primary-key recovery mock recording invocations.
#[derive(Default)]
pub struct RecordingRecover {
    recover_count: AtomicUsize,
}

impl RecordingRecover {
    pub fn recover_count(&self) -> usize {
        self.recover_count.load(Ordering::SeqCst)
    }
}

impl PrimaryKeyRecover for RecordingRecover {
    fn recover(
        &self,
        _tablet: &Tablet,
        _metadata: &mut TabletMetadata,
        _builder: &mut dyn MetaFileBuilder,
    ) -> ApplierResult<()> {
        self.recover_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The collaborator bundle tests wire a tablet handle from.
pub struct CoreServices {
    pub update_mgr: Arc<MockUpdateManager>,
    pub store: MemoryMetadataStore,
    pub recover: Arc<RecordingRecover>,
}

impl Default for CoreServices {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreServices {
    pub fn new() -> Self {
        Self {
            update_mgr: Arc::new(MockUpdateManager::new()),
            store: MemoryMetadataStore::new(),
            recover: Arc::new(RecordingRecover::default()),
        }
    }
}

/// Build a tablet handle over the mock services
pub fn create_test_tablet(tablet_id: TabletId, services: &CoreServices) -> Tablet {
    let store: Arc<dyn MetadataStore> = Arc::new(services.store.clone());
    Tablet::new(
        tablet_id,
        Arc::clone(&services.update_mgr) as Arc<dyn UpdateManager>,
        store,
        Arc::clone(&services.recover) as Arc<dyn PrimaryKeyRecover>,
    )
}

/// Base metadata snapshot with a two-column schema of the given key model
pub fn create_test_metadata(
    tablet_id: TabletId,
    version: u64,
    keys_type: KeysType,
) -> TabletMetadata {
    let schema = TabletSchema::new(
        1,
        keys_type,
        vec![
            ColumnSchema::key("id", ColumnType::BigInt),
            ColumnSchema::value("payload", ColumnType::Varchar),
        ],
    );
    TabletMetadata::new(tablet_id, schema, version)
}

/// Assert the properties every successfully finished snapshot upholds:
/// the stamped version, the rowset-id allocator strictly above every id in
/// use, no duplicate ids, and a cumulative point within bounds.
pub fn assert_snapshot_invariants(metadata: &TabletMetadata, new_version: u64) {
    assert_eq!(metadata.version, new_version);
    let mut seen = HashSet::new();
    for id in metadata.all_rowset_ids() {
        assert!(
            id < metadata.next_rowset_id,
            "rowset id {id} not below next_rowset_id {}",
            metadata.next_rowset_id
        );
        assert!(seen.insert(id), "duplicate rowset id {id}");
    }
    assert!(metadata.cumulative_point as usize <= metadata.rowsets.len());
}

/// Rowset with `num_segments` synthetic segment files
pub fn create_test_rowset(id: u32, num_rows: u64, num_segments: usize) -> RowsetMetadata {
    RowsetMetadata {
        id,
        segments: (0..num_segments)
            .map(|i| format!("seg_{id}_{i}.dat"))
            .collect(),
        num_rows,
        data_size: num_rows * 8,
        overlapped: false,
        delete_predicate: None,
    }
}
