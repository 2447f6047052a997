// Copyright (C) 2025 The tarn authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::{
    collections::HashMap,
    hash::BuildHasherDefault,
    path::Path,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicI64, Ordering},
    },
};

use ahash::AHasher;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    backing::CollectionTree,
    commit::{BagCommitContext, PendingBagOp},
    config::TableConfig,
    error::BagError,
};
use tarn_common::CollectionPointer;

const COLLECTION_PARTITION_PREFIX: &str = "global_collection_";
const COLLECTION_ID_SEQUENCE: &str = "collection_id_sequence";

type AHashMap<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;

/// Owns the fjall keyspace holding all shared collection trees, hands out
/// durable collection ids from a persisted sequence, and keeps the
/// per-session map from provisional (negative) collection ids to the durable
/// pointers they were assigned at commit.
pub struct CollectionManager {
    _tmpdir: Option<tempfile::TempDir>,
    keyspace: Keyspace,
    sequences: PartitionHandle,
    table_config: TableConfig,
    trees: Mutex<AHashMap<i64, Arc<CollectionTree>>>,
    next_collection_id: AtomicI64,
    next_temp_collection_id: AtomicI64,
    pending_pointers: RwLock<AHashMap<Uuid, AHashMap<i64, CollectionPointer>>>,
}

impl CollectionManager {
    /// Open (or create) the collections database. `None` opens a throwaway
    /// database in a temp directory. Returns the manager plus whether the
    /// database was freshly created.
    pub fn open(
        path: Option<&Path>,
        table_config: TableConfig,
    ) -> Result<(Arc<Self>, bool), BagError> {
        let (tmpdir, path) = match path {
            Some(path) => (None, path.to_path_buf()),
            None => {
                let tmpdir = tempfile::TempDir::new()
                    .map_err(|e| BagError::StorageFailure(e.to_string()))?;
                let path = tmpdir.path().to_path_buf();
                (Some(tmpdir), path)
            }
        };

        info!("Opening collections database at {:?}", path);
        let keyspace = Config::new(&path)
            .open()
            .map_err(|e| BagError::StorageFailure(e.to_string()))?;
        let fresh = keyspace.partition_count() == 0;

        let sequences = keyspace
            .open_partition("sequences", PartitionCreateOptions::default())
            .map_err(|e| BagError::StorageFailure(e.to_string()))?;

        let next_collection_id = match sequences
            .get(COLLECTION_ID_SEQUENCE)
            .map_err(|e| BagError::RetrievalFailure(e.to_string()))?
        {
            Some(bytes) => {
                let bytes: [u8; 8] =
                    bytes.as_ref().try_into().map_err(|_| BagError::EncodingFailure)?;
                i64::from_le_bytes(bytes)
            }
            None => 0,
        };

        Ok((
            Arc::new(Self {
                _tmpdir: tmpdir,
                keyspace,
                sequences,
                table_config,
                trees: Mutex::new(AHashMap::default()),
                next_collection_id: AtomicI64::new(next_collection_id),
                next_temp_collection_id: AtomicI64::new(-1),
                pending_pointers: RwLock::new(AHashMap::default()),
            }),
            fresh,
        ))
    }

    /// The shared tree for one file id, opening its partition on first use.
    pub fn tree(&self, file_id: i64) -> Result<Arc<CollectionTree>, BagError> {
        let mut trees = self.trees.lock().unwrap();
        if let Some(tree) = trees.get(&file_id) {
            return Ok(tree.clone());
        }
        let partition = self
            .keyspace
            .open_partition(
                &format!("{COLLECTION_PARTITION_PREFIX}{file_id}"),
                self.table_config.partition_options(),
            )
            .map_err(|e| BagError::StorageFailure(e.to_string()))?;
        let tree = Arc::new(CollectionTree::new(file_id, partition));
        trees.insert(file_id, tree.clone());
        Ok(tree)
    }

    /// Whether a tree file exists on disk without opening it.
    pub fn component_exists(&self, file_id: i64) -> bool {
        self.keyspace
            .partition_exists(&format!("{COLLECTION_PARTITION_PREFIX}{file_id}"))
    }

    /// Allocate the next durable collection id within a tree file and
    /// persist the sequence position.
    pub fn allocate_pointer(&self, file_id: i64) -> Result<CollectionPointer, BagError> {
        let collection_id = self.next_collection_id.fetch_add(1, Ordering::SeqCst);
        let next = collection_id + 1;
        self.sequences
            .insert(COLLECTION_ID_SEQUENCE, next.to_le_bytes())
            .map_err(|e| BagError::StorageFailure(e.to_string()))?;
        Ok(CollectionPointer::new(file_id, collection_id))
    }

    /// A provisional (negative, never persisted) collection id for a bag
    /// created inside an uncommitted transaction.
    pub fn allocate_temp_id(&self) -> i64 {
        self.next_temp_collection_id.fetch_sub(1, Ordering::SeqCst)
    }

    /// Record which durable pointer a session's provisional collection id
    /// was resolved to, so late arrivals in the same commit find it.
    pub fn register_pending_pointer(
        &self,
        session: Uuid,
        temp_collection_id: i64,
        pointer: CollectionPointer,
    ) {
        let mut pending = self.pending_pointers.write().unwrap();
        pending
            .entry(session)
            .or_default()
            .insert(temp_collection_id, pointer);
    }

    pub fn pending_pointer(
        &self,
        session: Uuid,
        temp_collection_id: i64,
    ) -> Option<CollectionPointer> {
        let pending = self.pending_pointers.read().unwrap();
        pending
            .get(&session)
            .and_then(|m| m.get(&temp_collection_id))
            .copied()
    }

    /// Drop a session's provisional-id resolutions, at commit completion or
    /// rollback.
    pub fn clear_session_pointers(&self, session: Uuid) {
        self.pending_pointers.write().unwrap().remove(&session);
    }

    /// Remove every stored entry of one collection. Other collections in the
    /// same tree file are untouched. Returns how many entries were purged.
    pub fn delete_collection(&self, pointer: CollectionPointer) -> Result<u64, BagError> {
        let tree = self.tree(pointer.file_id)?;
        let purged = tree.purge_collection(pointer.collection_id)?;
        info!("Deleted collection {pointer} ({purged} entries)");
        Ok(purged)
    }

    /// Apply all queued tree mutations of one committing transaction, then
    /// drop the session's provisional-id resolutions.
    pub fn materialize(&self, ctx: BagCommitContext) -> Result<(), BagError> {
        let session = ctx.session();
        for op in ctx.into_ops() {
            match op {
                PendingBagOp::Update {
                    pointer,
                    counter_max_value,
                    entries,
                } => {
                    let tree = self.tree(pointer.file_id)?;
                    for (rid, change) in entries {
                        let base = tree.get_count(pointer.collection_id, &rid)?;
                        // An undefined absolute carries no information beyond
                        // the stored count itself; leave the entry alone.
                        let Some(count) = change.resolve(base, counter_max_value) else {
                            continue;
                        };
                        tree.put_count(
                            pointer.collection_id,
                            &rid,
                            count.min(u64::from(counter_max_value)) as u32,
                        )
                        .map_err(|e| {
                            error!("Failed to materialize entry {rid} of {pointer}: {e}");
                            e
                        })?;
                    }
                }
                PendingBagOp::Delete { pointer } => {
                    self.delete_collection(pointer)?;
                }
            }
        }
        self.clear_session_pointers(session);
        Ok(())
    }
}
