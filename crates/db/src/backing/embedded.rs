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

use ahash::AHasher;
use std::{collections::HashMap, hash::BuildHasherDefault};

use crate::{backing::BagBacking, error::BagError};
use tarn_common::Rid;

/// Fully in-memory tier for small bags: a plain hash map from identifier to
/// multiplicity. Lookups are O(1); batch reads sort on demand, which is fine
/// because embedded bags are below the tree-conversion threshold by
/// definition.
#[derive(Clone, Debug, Default)]
pub struct EmbeddedBacking {
    counts: HashMap<Rid, u64, BuildHasherDefault<AHasher>>,
}

impl EmbeddedBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Rid, u64)>) -> Self {
        Self {
            counts: entries.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Fold resolved counts into the steady-state map. Zero counts evict.
    pub(crate) fn apply(&mut self, resolved: impl IntoIterator<Item = (Rid, u64)>) {
        for (rid, count) in resolved {
            if count == 0 {
                self.counts.remove(&rid);
            } else {
                self.counts.insert(rid, count);
            }
        }
    }
}

impl BagBacking for EmbeddedBacking {
    fn kind(&self) -> &'static str {
        "embedded"
    }

    fn absolute_value(&self, rid: &Rid) -> Result<u64, BagError> {
        Ok(self.counts.get(rid).copied().unwrap_or(0))
    }

    fn read_batch(
        &self,
        after: Option<&Rid>,
        limit: usize,
    ) -> Result<Vec<(Rid, u64)>, BagError> {
        let mut batch: Vec<(Rid, u64)> = self
            .counts
            .iter()
            .filter(|(rid, count)| **count > 0 && after.is_none_or(|a| *rid > a))
            .map(|(rid, count)| (*rid, *count))
            .collect();
        batch.sort_unstable_by_key(|(rid, _)| *rid);
        batch.truncate(limit);
        Ok(batch)
    }

    fn stored_size(&self) -> Result<Option<u64>, BagError> {
        Ok(None)
    }

    fn supports_update_size(&self) -> bool {
        false
    }

    fn supports_delete(&self) -> bool {
        false
    }
}
