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
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use byteview::ByteView;
use fjall::PartitionHandle;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{backing::BagBacking, error::BagError};
use tarn_common::{CollectionPointer, Rid};

/// Key for one (collection, identifier) pair inside a shared tree partition.
/// Both components are big-endian with the sign bit flipped, so byte order
/// equals logical order and all keys of one collection form one contiguous
/// run.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct TreeKey {
    collection_id: [u8; 8],
    rid: [u8; 12],
}

fn collection_prefix(collection_id: i64) -> [u8; 8] {
    ((collection_id as u64) ^ (1 << 63)).to_be_bytes()
}

fn encode_key(collection_id: i64, rid: &Rid) -> Result<ByteView, BagError> {
    let key = TreeKey {
        collection_id: collection_prefix(collection_id),
        rid: rid
            .key_bytes()
            .map_err(|_| BagError::InvalidRid(*rid))?,
    };
    Ok(ByteView::from(key.as_bytes()))
}

fn decode_entry(key: &[u8], value: &[u8]) -> Result<(Rid, u64), BagError> {
    let key = TreeKey::ref_from_bytes(key).map_err(|_| BagError::EncodingFailure)?;
    let count: [u8; 4] = value.try_into().map_err(|_| BagError::EncodingFailure)?;
    Ok((
        Rid::from_key_bytes(&key.rid),
        u64::from(u32::from_le_bytes(count)),
    ))
}

/// One shared tree file: a single fjall partition multiplexing the entries
/// of many collections, told apart by the collection-id key prefix.
pub struct CollectionTree {
    file_id: i64,
    partition: PartitionHandle,
    active_readers: AtomicUsize,
}

impl CollectionTree {
    pub(crate) fn new(file_id: i64, partition: PartitionHandle) -> Self {
        Self {
            file_id,
            partition,
            active_readers: AtomicUsize::new(0),
        }
    }

    pub fn file_id(&self) -> i64 {
        self.file_id
    }

    /// Number of reads currently in flight against this tree.
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::Acquire)
    }

    /// Pin the tree for the duration of one read. Writers that restructure
    /// whole collections check [`Self::active_readers`] before proceeding.
    pub fn acquire(&self) -> TreeGuard<'_> {
        self.active_readers.fetch_add(1, Ordering::AcqRel);
        TreeGuard { tree: self }
    }

    pub(crate) fn get_count(&self, collection_id: i64, rid: &Rid) -> Result<u64, BagError> {
        let _guard = self.acquire();
        let key = encode_key(collection_id, rid)?;
        match self
            .partition
            .get(&key)
            .map_err(|e| BagError::RetrievalFailure(e.to_string()))?
        {
            Some(value) => {
                let count: [u8; 4] =
                    value.as_ref().try_into().map_err(|_| BagError::EncodingFailure)?;
                Ok(u64::from(u32::from_le_bytes(count)))
            }
            None => Ok(0),
        }
    }

    fn scan_after(
        &self,
        collection_id: i64,
        after: Option<&Rid>,
        limit: usize,
    ) -> Result<Vec<(Rid, u64)>, BagError> {
        let _guard = self.acquire();
        let start = match after {
            Some(rid) => Bound::Excluded(encode_key(collection_id, rid)?.to_vec()),
            None => Bound::Included(collection_prefix(collection_id).to_vec()),
        };
        // All keys of this collection sort below the successor prefix.
        let biased = (collection_id as u64) ^ (1 << 63);
        let end = match biased.checked_add(1) {
            Some(next) => Bound::Excluded(next.to_be_bytes().to_vec()),
            None => Bound::Unbounded,
        };

        let mut batch = Vec::with_capacity(limit.min(1024));
        for entry in self.partition.range::<Vec<u8>, _>((start, end)).take(limit) {
            let (key, value) =
                entry.map_err(|e| BagError::RetrievalFailure(e.to_string()))?;
            batch.push(decode_entry(key.as_ref(), value.as_ref())?);
        }
        Ok(batch)
    }

    pub(crate) fn put_count(
        &self,
        collection_id: i64,
        rid: &Rid,
        count: u32,
    ) -> Result<(), BagError> {
        let key = encode_key(collection_id, rid)?;
        if count == 0 {
            self.partition
                .remove(key.as_ref())
                .map_err(|e| BagError::StorageFailure(e.to_string()))?;
        } else {
            self.partition
                .insert(key.as_ref(), count.to_le_bytes())
                .map_err(|e| BagError::StorageFailure(e.to_string()))?;
        }
        Ok(())
    }

    /// Remove every stored entry of one collection. Returns how many entries
    /// were purged.
    pub(crate) fn purge_collection(&self, collection_id: i64) -> Result<u64, BagError> {
        let mut purged = 0;
        loop {
            // Re-scan from the top; removal invalidates nothing but this
            // keeps each pass bounded.
            let batch = self.scan_after(collection_id, None, 1024)?;
            if batch.is_empty() {
                return Ok(purged);
            }
            for (rid, _) in &batch {
                let key = encode_key(collection_id, rid)?;
                self.partition
                    .remove(key.as_ref())
                    .map_err(|e| BagError::StorageFailure(e.to_string()))?;
                purged += 1;
            }
        }
    }
}

pub struct TreeGuard<'a> {
    tree: &'a CollectionTree,
}

impl Drop for TreeGuard<'_> {
    fn drop(&mut self) {
        self.tree.active_readers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tree tier of a bag: a window onto one collection inside a shared
/// [`CollectionTree`]. A freshly created bag has no pointer yet; until one
/// is assigned at commit, the stored tier reads as empty.
#[derive(Clone)]
pub struct TreeBacking {
    tree: Arc<CollectionTree>,
    pointer: Option<CollectionPointer>,
}

impl TreeBacking {
    pub fn new(tree: Arc<CollectionTree>, pointer: Option<CollectionPointer>) -> Self {
        Self { tree, pointer }
    }

    pub fn pointer(&self) -> Option<CollectionPointer> {
        self.pointer
    }

    pub(crate) fn set_pointer(&mut self, pointer: CollectionPointer) {
        self.pointer = Some(pointer);
    }

    pub fn tree(&self) -> &Arc<CollectionTree> {
        &self.tree
    }
}

impl BagBacking for TreeBacking {
    fn kind(&self) -> &'static str {
        "tree"
    }

    fn absolute_value(&self, rid: &Rid) -> Result<u64, BagError> {
        match self.pointer {
            Some(pointer) => self.tree.get_count(pointer.collection_id, rid),
            None => Ok(0),
        }
    }

    fn read_batch(
        &self,
        after: Option<&Rid>,
        limit: usize,
    ) -> Result<Vec<(Rid, u64)>, BagError> {
        match self.pointer {
            Some(pointer) => self.tree.scan_after(pointer.collection_id, after, limit),
            None => Ok(vec![]),
        }
    }

    fn stored_size(&self) -> Result<Option<u64>, BagError> {
        Ok(None)
    }

    fn supports_update_size(&self) -> bool {
        true
    }

    fn supports_delete(&self) -> bool {
        true
    }
}
