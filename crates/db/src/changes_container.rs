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

use crate::change::Change;
use tarn_common::Rid;

/// Pending per-identifier changes for one bag, kept sorted by identifier so
/// iteration can merge against the (also sorted) persisted tier.
///
/// Backed by a flat sorted vector; bags are small and change sets smaller, so
/// binary search plus shifting inserts beats a tree here. Every structural or
/// value mutation bumps `modifications`, which cursors snapshot to detect that
/// their position has been invalidated and must be re-acquired by key.
#[derive(Clone, Debug, Default)]
pub struct ChangesContainer {
    entries: Vec<(Rid, Change)>,
    modifications: u64,
}

impl ChangesContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container from pre-sorted pairs, e.g. when hydrating a bag
    /// from its stored form.
    pub fn fill_all_sorted(entries: Vec<(Rid, Change)>) -> Self {
        debug_assert!(entries.is_sorted_by_key(|(rid, _)| *rid));
        Self {
            entries,
            modifications: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn modifications(&self) -> u64 {
        self.modifications
    }

    pub fn get(&self, rid: &Rid) -> Option<&Change> {
        self.index_of(rid).map(|i| &self.entries[i].1)
    }

    /// Insert or overwrite the change for `rid`.
    pub fn put(&mut self, rid: Rid, change: Change) {
        self.modifications += 1;
        match self.entries.binary_search_by_key(&rid, |(r, _)| *r) {
            Ok(i) => self.entries[i].1 = change,
            Err(i) => self.entries.insert(i, (rid, change)),
        }
    }

    /// Mutate the change for `rid` in place, if present. Counts as a
    /// modification even when the closure leaves the value untouched.
    pub fn update<R>(&mut self, rid: &Rid, f: impl FnOnce(&mut Change) -> R) -> Option<R> {
        let i = self.index_of(rid)?;
        self.modifications += 1;
        Some(f(&mut self.entries[i].1))
    }

    pub fn remove(&mut self, rid: &Rid) -> Option<Change> {
        let i = self.index_of(rid)?;
        self.modifications += 1;
        Some(self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Rid, Change)> {
        self.entries.iter()
    }

    /// All entries with an identifier strictly greater than `rid`.
    pub fn iter_after(&self, rid: &Rid) -> impl Iterator<Item = &(Rid, Change)> {
        self.entries[self.position_after(rid)..].iter()
    }

    pub fn index_of(&self, rid: &Rid) -> Option<usize> {
        self.entries.binary_search_by_key(rid, |(r, _)| *r).ok()
    }

    /// Index of the first entry strictly after `rid`; used by cursors to
    /// re-acquire their position after a concurrent mutation.
    pub fn position_after(&self, rid: &Rid) -> usize {
        match self.entries.binary_search_by_key(rid, |(r, _)| *r) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    pub fn entry_at(&self, index: usize) -> Option<&(Rid, Change)> {
        self.entries.get(index)
    }
}
