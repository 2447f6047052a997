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

use fjall::PartitionCreateOptions;
use serde::{Deserialize, Serialize};

/// Bags larger than this migrate from the embedded map to a shared tree.
pub const DEFAULT_EMBEDDED_TO_TREE_THRESHOLD: u64 = 40;
/// Tree backed bags shrinking below this migrate back to the embedded map.
/// Deliberately lower than the upward threshold so a bag oscillating around
/// one boundary does not convert back and forth on every mutation.
pub const DEFAULT_TREE_TO_EMBEDDED_THRESHOLD: u64 = 20;
/// How many persisted entries a cursor fetches from the tree per batch.
pub const DEFAULT_PREFETCH_BATCH_SIZE: usize = 1000;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BagConfig {
    /// `None` skips the embedded representation entirely; new bags start
    /// out tree backed and never convert.
    pub embedded_to_tree_threshold: Option<u64>,
    /// `None` disables downward conversion.
    pub tree_to_embedded_threshold: Option<u64>,
    /// Hard cap on any one identifier's multiplicity.
    pub counter_max_value: u32,
    pub prefetch_batch_size: usize,
    pub collection_table: TableConfig,
}

impl Default for BagConfig {
    fn default() -> Self {
        Self {
            embedded_to_tree_threshold: Some(DEFAULT_EMBEDDED_TO_TREE_THRESHOLD),
            tree_to_embedded_threshold: Some(DEFAULT_TREE_TO_EMBEDDED_THRESHOLD),
            counter_max_value: u32::MAX,
            prefetch_batch_size: DEFAULT_PREFETCH_BATCH_SIZE,
            collection_table: TableConfig::default(),
        }
    }
}

/// Tuning knobs for the partitions holding collection trees.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub block_size: Option<u32>,
    pub max_memtable_size: Option<u32>,
}

impl TableConfig {
    pub fn partition_options(&self) -> PartitionCreateOptions {
        let mut options = PartitionCreateOptions::default();
        if let Some(block_size) = self.block_size {
            options = options.block_size(block_size);
        }
        if let Some(max_memtable_size) = self.max_memtable_size {
            options = options.max_memtable_size(max_memtable_size);
        }
        options
    }
}
