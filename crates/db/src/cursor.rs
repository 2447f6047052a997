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

use std::{collections::VecDeque, ops::Bound};

use crate::{backing::BagBacking, bag::LinkBag, change::Change, error::BagError};
use tarn_common::Rid;

/// Cursor over a bag's merged contents, yielding each identifier once per
/// multiplicity, never-persisted entries first and then the pending-change /
/// stored-tier merge in ascending identifier order.
///
/// The cursor borrows nothing: the bag is passed into every step. That makes
/// it safe to mutate the bag between steps. Position in the never-persisted
/// source is re-derived by key on every step; position in the pending-change
/// source is an index validated against the container's modification counter
/// and re-acquired by key (strictly after the last merged identifier) when a
/// mutation invalidated it. An identifier already yielded is never yielded
/// again, and entries inserted behind the cursor are not picked up.
pub struct BagCursor {
    prefetch: usize,

    new_done: bool,
    last_new: Option<Rid>,

    local_mods: u64,
    local_pos: usize,
    local_next: Option<(Rid, Change)>,

    tree_buf: VecDeque<(Rid, u64)>,
    tree_exhausted: bool,
    tree_last_loaded: Option<Rid>,
    tree_next: Option<(Rid, u64)>,

    last_merged: Option<Rid>,

    current: Option<Rid>,
    remaining: u64,
}

impl BagCursor {
    pub(crate) fn new<B: BagBacking>(bag: &LinkBag<B>) -> Self {
        Self {
            prefetch: bag.prefetch_batch_size().max(1),
            new_done: false,
            last_new: None,
            local_mods: bag.local_changes().modifications(),
            local_pos: 0,
            local_next: None,
            tree_buf: VecDeque::new(),
            tree_exhausted: false,
            tree_last_loaded: None,
            tree_next: None,
            last_merged: None,
            current: None,
            remaining: 0,
        }
    }

    /// The identifier most recently yielded, if any.
    pub fn current(&self) -> Option<Rid> {
        self.current
    }

    /// Advance and yield the next occurrence, or `None` when exhausted.
    pub fn next<B: BagBacking>(&mut self, bag: &LinkBag<B>) -> Result<Option<Rid>, BagError> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(self.current);
        }

        if !self.new_done {
            let next = match &self.last_new {
                None => bag
                    .new_entries()
                    .iter()
                    .next()
                    .map(|(rid, counter)| (*rid, *counter)),
                Some(last) => bag
                    .new_entries()
                    .range((Bound::Excluded(*last), Bound::Unbounded))
                    .next()
                    .map(|(rid, counter)| (*rid, *counter)),
            };
            match next {
                Some((rid, counter)) => {
                    self.last_new = Some(rid);
                    if counter == 0 {
                        return self.next(bag);
                    }
                    self.current = Some(rid);
                    self.remaining = u64::from(counter) - 1;
                    return Ok(self.current);
                }
                None => self.new_done = true,
            }
        }

        loop {
            self.resync_local(bag);
            self.fill_local(bag);
            self.fill_tree(bag)?;

            let (rid, count) = match (self.local_next, self.tree_next) {
                (Some((lrid, change)), Some((trid, tcount))) => {
                    if lrid < trid {
                        self.local_next = None;
                        (lrid, Self::resolve_local_only(bag, &lrid, &change)?)
                    } else if lrid > trid {
                        self.tree_next = None;
                        (trid, tcount)
                    } else {
                        // Same identifier on both sides: the pending change
                        // wins, resolved against the stored count, and both
                        // sides advance.
                        self.local_next = None;
                        self.tree_next = None;
                        let count = change
                            .resolve(tcount, bag.counter_max_value())
                            .unwrap_or(tcount);
                        (lrid, count)
                    }
                }
                (Some((lrid, change)), None) => {
                    self.local_next = None;
                    (lrid, Self::resolve_local_only(bag, &lrid, &change)?)
                }
                (None, Some((trid, tcount))) => {
                    self.tree_next = None;
                    (trid, tcount)
                }
                (None, None) => {
                    self.current = None;
                    return Ok(None);
                }
            };

            self.last_merged = Some(rid);
            if count == 0 {
                continue;
            }
            self.current = Some(rid);
            self.remaining = count - 1;
            return Ok(self.current);
        }
    }

    /// Remove the current occurrence from the bag and keep the cursor
    /// consistent: one fewer future yield of this identifier.
    pub fn remove_current<B: BagBacking>(
        &mut self,
        bag: &mut LinkBag<B>,
    ) -> Result<bool, BagError> {
        let Some(rid) = self.current else {
            return Err(BagError::IllegalState(
                "remove_current with no current element".into(),
            ));
        };
        let removed = bag.remove(rid)?;
        if removed {
            self.removed(rid);
        }
        Ok(removed)
    }

    /// Tell the cursor that one occurrence of `rid` was removed from the bag
    /// out of band, so pending repeats of the current identifier shrink
    /// accordingly.
    pub fn removed(&mut self, rid: Rid) {
        if self.current == Some(rid) && self.remaining > 0 {
            self.remaining -= 1;
        }
    }

    // Pending changes to an identifier at or before the last merged key do
    // not reposition us; the suffix is re-acquired strictly after it.
    fn resync_local<B: BagBacking>(&mut self, bag: &LinkBag<B>) {
        let mods = bag.local_changes().modifications();
        if mods == self.local_mods {
            return;
        }
        self.local_mods = mods;
        self.local_next = None;
        self.local_pos = match &self.last_merged {
            Some(last) => bag.local_changes().position_after(last),
            None => 0,
        };
    }

    fn fill_local<B: BagBacking>(&mut self, bag: &LinkBag<B>) {
        if self.local_next.is_some() {
            return;
        }
        if let Some(entry) = bag.local_changes().entry_at(self.local_pos) {
            self.local_next = Some(*entry);
            self.local_pos += 1;
        }
    }

    fn fill_tree<B: BagBacking>(&mut self, bag: &LinkBag<B>) -> Result<(), BagError> {
        while self.tree_next.is_none() {
            if let Some(entry) = self.tree_buf.pop_front() {
                self.tree_next = Some(entry);
                return Ok(());
            }
            if self.tree_exhausted {
                return Ok(());
            }
            let batch = bag
                .backing()
                .read_batch(self.tree_last_loaded.as_ref(), self.prefetch)?;
            match batch.last() {
                Some((last, _)) => {
                    self.tree_last_loaded = Some(*last);
                    self.tree_buf.extend(batch);
                }
                None => self.tree_exhausted = true,
            }
        }
        Ok(())
    }

    fn resolve_local_only<B: BagBacking>(
        bag: &LinkBag<B>,
        rid: &Rid,
        change: &Change,
    ) -> Result<u64, BagError> {
        match change {
            // No stored entry at this key, so relative changes resolve
            // against zero without touching the backing.
            Change::Diff(_) | Change::Absolute(Some(_)) => {
                Ok(change.resolve(0, bag.counter_max_value()).unwrap_or(0))
            }
            Change::Absolute(None) => bag.resolved_count(rid, change),
        }
    }
}

/// Iterator adapter over [`BagCursor`], for callers that do not mutate the
/// bag while walking it.
pub struct Iter<'a, B: BagBacking> {
    bag: &'a LinkBag<B>,
    cursor: BagCursor,
}

impl<'a, B: BagBacking> Iter<'a, B> {
    pub(crate) fn new(bag: &'a LinkBag<B>) -> Self {
        Self {
            bag,
            cursor: bag.cursor(),
        }
    }
}

impl<B: BagBacking> Iterator for Iter<'_, B> {
    type Item = Result<Rid, BagError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next(self.bag).transpose()
    }
}
