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
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::Arc,
};

use crate::{
    CollectionManager,
    backing::{BagBacking, EmbeddedBacking, TreeBacking},
    change::{Change, Decrement},
    changes_container::ChangesContainer,
    commit::{BagCommitContext, PendingBagOp},
    cursor::{BagCursor, Iter},
    error::BagError,
    tracker::{BagEvent, MultiValueTracker},
};
use tarn_common::{Rid, RidResolver};

/// The record (or other container) holding a bag, notified when the bag's
/// contents change so it can mark itself for persistence.
pub trait BagOwner: Send + Sync {
    /// The bag changed in a way that affects its stored form.
    fn mark_dirty(&self);

    /// The bag must be rewritten even though its logical content timeline
    /// recorded nothing, e.g. after an internal representation fixup.
    fn mark_dirty_no_changed(&self) {
        self.mark_dirty();
    }
}

/// Counted multiset of record identifiers, layered over a persisted tier.
///
/// Three sources make up the live contents: `new_entries` holds records that
/// have never been persisted (keyed by temporary identifier, kept sorted),
/// `local_changes` holds pending mutations against already-persisted
/// identifiers, and the backing holds whatever was stored when the bag was
/// loaded. Iteration drains `new_entries` first and then merges the other two
/// in ascending identifier order, local changes overriding the stored counts.
///
/// The cached size is `None` whenever a relative change with an unknown base
/// makes the precise count unknowable without a backing walk.
#[derive(Clone)]
pub struct LinkBag<B: BagBacking> {
    backing: B,
    resolver: Arc<dyn RidResolver>,
    counter_max_value: u32,
    prefetch_batch_size: usize,
    size: Option<u64>,
    new_entries: BTreeMap<Rid, u32>,
    local_changes: ChangesContainer,
    tracker: MultiValueTracker,
    owner: Option<Arc<dyn BagOwner>>,
    dirty: bool,
    transaction_dirty: bool,
}

impl<B: BagBacking> LinkBag<B> {
    /// A brand-new, empty bag with nothing persisted behind it.
    pub fn new(
        backing: B,
        resolver: Arc<dyn RidResolver>,
        counter_max_value: u32,
        prefetch_batch_size: usize,
    ) -> Self {
        Self {
            backing,
            resolver,
            counter_max_value,
            prefetch_batch_size,
            size: Some(0),
            new_entries: BTreeMap::new(),
            local_changes: ChangesContainer::new(),
            tracker: MultiValueTracker::new(),
            owner: None,
            dirty: false,
            transaction_dirty: false,
        }
    }

    /// Rebuild a bag from its stored form: the backing plus the change set
    /// that was serialized alongside it. The stored size is only trusted if
    /// every change is an absolute with a known value.
    pub fn hydrate(
        backing: B,
        resolver: Arc<dyn RidResolver>,
        counter_max_value: u32,
        prefetch_batch_size: usize,
        stored_size: Option<u64>,
        changes: Vec<(Rid, Change)>,
    ) -> Self {
        let exact = changes
            .iter()
            .all(|(_, c)| matches!(c, Change::Absolute(Some(_))));
        Self {
            backing,
            resolver,
            counter_max_value,
            prefetch_batch_size,
            size: if exact { stored_size } else { None },
            new_entries: BTreeMap::new(),
            local_changes: ChangesContainer::fill_all_sorted(changes),
            tracker: MultiValueTracker::new(),
            owner: None,
            dirty: false,
            transaction_dirty: false,
        }
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn counter_max_value(&self) -> u32 {
        self.counter_max_value
    }

    pub(crate) fn prefetch_batch_size(&self) -> usize {
        self.prefetch_batch_size
    }

    pub(crate) fn new_entries(&self) -> &BTreeMap<Rid, u32> {
        &self.new_entries
    }

    pub(crate) fn local_changes(&self) -> &ChangesContainer {
        &self.local_changes
    }

    fn canonical(&self, rid: Rid) -> Rid {
        self.resolver.canonical(rid)
    }

    /// Add one occurrence of `rid`. Returns whether the multiplicity
    /// actually grew; it does not when the per-identifier cap has been
    /// reached.
    pub fn add(&mut self, rid: Rid) -> Result<bool, BagError> {
        if !rid.is_valid() {
            return Err(BagError::InvalidRid(rid));
        }
        let rid = self.canonical(rid);
        let cap = self.counter_max_value;

        let grew = if rid.is_persistent() {
            match self.local_changes.update(&rid, |c| c.increment(cap)) {
                Some(grew) => grew,
                None => {
                    let base = self.backing.absolute_value(&rid)?;
                    let mut change =
                        Change::absolute(base.min(u64::from(u32::MAX)) as u32);
                    let grew = change.increment(cap);
                    self.local_changes.put(rid, change);
                    grew
                }
            }
        } else if cap == 0 {
            // A zero cap admits nothing; never leave a zero-count entry
            // behind for `contains` to find.
            false
        } else {
            let counter = self.new_entries.entry(rid).or_insert(0);
            if *counter < cap {
                *counter += 1;
                true
            } else {
                false
            }
        };

        if grew {
            self.size = self.size.map(|s| s + 1);
            self.add_event(rid);
        }
        Ok(grew)
    }

    pub fn add_all(&mut self, rids: impl IntoIterator<Item = Rid>) -> Result<(), BagError> {
        for rid in rids {
            self.add(rid)?;
        }
        Ok(())
    }

    /// Remove one occurrence of `rid`. Returns whether anything was removed.
    pub fn remove(&mut self, rid: Rid) -> Result<bool, BagError> {
        if !rid.is_valid() {
            return Err(BagError::InvalidRid(rid));
        }
        let rid = self.canonical(rid);

        if let Some(counter) = self.new_entries.get_mut(&rid) {
            if *counter <= 1 {
                self.new_entries.remove(&rid);
            } else {
                *counter -= 1;
            }
            self.size = self.size.map(|s| s.saturating_sub(1));
            self.remove_event(rid);
            return Ok(true);
        }

        match self.local_changes.update(&rid, Change::decrement) {
            Some(Decrement::Applied) => {
                self.size = self.size.map(|s| s.saturating_sub(1));
                self.remove_event(rid);
                Ok(true)
            }
            Some(Decrement::AppliedUnknown) => {
                self.size = None;
                self.remove_event(rid);
                Ok(true)
            }
            Some(Decrement::Unchanged) => Ok(false),
            None => {
                if !rid.is_persistent() {
                    return Ok(false);
                }
                let base = self.backing.absolute_value(&rid)?;
                if base > 0 {
                    self.local_changes.put(
                        rid,
                        Change::absolute((base - 1).min(u64::from(u32::MAX)) as u32),
                    );
                    self.size = self.size.map(|s| s.saturating_sub(1));
                    self.remove_event(rid);
                    Ok(true)
                } else {
                    // The identifier was not present, but touching the bag
                    // must still surface as a version bump so a concurrent
                    // writer of the same stored collection conflicts with us.
                    self.set_dirty_no_changed();
                    Ok(false)
                }
            }
        }
    }

    pub fn contains(&self, rid: Rid) -> Result<bool, BagError> {
        if !rid.is_valid() {
            return Ok(false);
        }
        let rid = self.canonical(rid);
        if self.new_entries.contains_key(&rid) {
            return Ok(true);
        }
        if !rid.is_persistent() {
            return Ok(false);
        }
        let count = match self.local_changes.get(&rid) {
            Some(change) => self.resolved_count(&rid, change)?,
            None => self.backing.absolute_value(&rid)?,
        };
        Ok(count > 0)
    }

    /// The cached size, `None` when it is currently unknowable without a
    /// backing walk ([`Self::update_size`] recomputes it where supported).
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Known-empty. A bag whose size is undefined is not known empty.
    pub fn is_empty(&self) -> bool {
        self.size == Some(0)
    }

    /// Resolve a pending change against the stored count, reading the
    /// backing only when the change does not pin an absolute value.
    pub(crate) fn resolved_count(
        &self,
        rid: &Rid,
        change: &Change,
    ) -> Result<u64, BagError> {
        if let Change::Absolute(Some(v)) = change {
            return Ok(u64::from(*v));
        }
        let base = self.backing.absolute_value(rid)?;
        Ok(change
            .resolve(base, self.counter_max_value)
            .unwrap_or(base))
    }

    /// Recompute the size, repinning every relative change to the absolute
    /// count it resolved to. Restores a defined size after diff-based merges.
    ///
    /// A backing that reports its stored total directly (the remote stub) is
    /// not scanned; the total is adjusted by the resolved local deltas, with
    /// one point lookup per pending change. Otherwise the merged contents are
    /// walked in batches.
    pub fn update_size(&mut self) -> Result<u64, BagError> {
        if !self.backing.supports_update_size() {
            return Err(BagError::UnsupportedOperation(
                self.backing.kind(),
                "update_size",
            ));
        }

        if let Some(stored) = self.backing.stored_size()? {
            let mut total = stored;
            let mut repinned = Vec::with_capacity(self.local_changes.len());
            for (rid, change) in self.local_changes.iter() {
                let base = self.backing.absolute_value(rid)?;
                let count = change
                    .resolve(base, self.counter_max_value)
                    .unwrap_or(base);
                total = total.saturating_sub(base) + count;
                repinned.push((*rid, count));
            }
            return self.finish_size_recompute(total, repinned);
        }

        let local_count = self.local_changes.len();
        let mut resolved: Vec<Option<u64>> = vec![None; local_count];
        let mut total: u64 = 0;

        let mut after: Option<Rid> = None;
        loop {
            let batch = self
                .backing
                .read_batch(after.as_ref(), self.prefetch_batch_size)?;
            let Some((last, _)) = batch.last() else {
                break;
            };
            after = Some(*last);
            for (rid, base) in batch {
                match self.local_changes.index_of(&rid) {
                    Some(i) => {
                        let (_, change) = self.local_changes.entry_at(i).ok_or_else(|| {
                            BagError::IllegalState("change set shrank mid-walk".into())
                        })?;
                        let count = change
                            .resolve(base, self.counter_max_value)
                            .unwrap_or(base);
                        resolved[i] = Some(count);
                        total += count;
                    }
                    None => total += base,
                }
            }
        }

        // Changes with no stored entry resolve against a base of zero.
        let mut repinned = Vec::with_capacity(local_count);
        for i in 0..local_count {
            let (rid, change) = *self.local_changes.entry_at(i).ok_or_else(|| {
                BagError::IllegalState("change set shrank mid-walk".into())
            })?;
            let count = match resolved[i] {
                Some(count) => count,
                None => {
                    let count = change.resolve(0, self.counter_max_value).unwrap_or(0);
                    total += count;
                    count
                }
            };
            repinned.push((rid, count));
        }
        self.finish_size_recompute(total, repinned)
    }

    fn finish_size_recompute(
        &mut self,
        mut total: u64,
        repinned: Vec<(Rid, u64)>,
    ) -> Result<u64, BagError> {
        for (rid, count) in repinned {
            self.local_changes.put(
                rid,
                Change::absolute(count.min(u64::from(self.counter_max_value)) as u32),
            );
        }
        for counter in self.new_entries.values() {
            total += u64::from(*counter);
        }
        self.size = Some(total);
        Ok(total)
    }

    /// A detached cursor over the merged contents. The cursor holds no
    /// borrow of the bag; pass the bag back in on every step, which lets
    /// callers interleave mutation with iteration.
    pub fn cursor(&self) -> BagCursor {
        BagCursor::new(self)
    }

    pub fn iter(&self) -> Iter<'_, B> {
        Iter::new(self)
    }

    /// Re-key one never-persisted entry to the identifier it was assigned at
    /// commit. No-op if the bag holds nothing under `temp`.
    pub fn finalize_new_entry(&mut self, temp: Rid, assigned: Rid) -> Result<(), BagError> {
        if !temp.is_temporary() {
            return Err(BagError::InvalidRid(temp));
        }
        let Some(count) = self.new_entries.remove(&temp) else {
            return Ok(());
        };
        let cap = self.counter_max_value;
        if assigned.is_persistent() {
            if self
                .local_changes
                .update(&assigned, |c| c.apply_diff(i64::from(count), cap))
                .is_none()
            {
                self.local_changes.put(assigned, Change::absolute(count));
            }
        } else {
            let counter = self.new_entries.entry(assigned).or_insert(0);
            *counter = (*counter).saturating_add(count).min(cap);
        }
        Ok(())
    }

    /// The merged pending change set, ascending by identifier, with every
    /// never-persisted entry resolved to its assigned identifier. Fails if
    /// any entry is still unresolved, since stored counts can only be keyed
    /// by persistent identifiers.
    pub fn pending_changes(&self) -> Result<Vec<(Rid, Change)>, BagError> {
        let cap = self.counter_max_value;
        let mut merged: BTreeMap<Rid, Change> = self
            .local_changes
            .iter()
            .map(|(rid, change)| (*rid, *change))
            .collect();
        for (temp, count) in &self.new_entries {
            let assigned = self.canonical(*temp);
            if !assigned.is_persistent() {
                return Err(BagError::IllegalState(format!(
                    "entry {temp} has no assigned identifier at commit time"
                )));
            }
            merged
                .entry(assigned)
                .or_insert(Change::absolute(0))
                .apply_diff(i64::from(*count), cap);
        }
        Ok(merged.into_iter().collect())
    }

    /// Whether anything is pending against the stored tier.
    pub fn has_pending(&self) -> bool {
        !self.new_entries.is_empty() || !self.local_changes.is_empty()
    }

    /// Forget all pending state after it has been made durable.
    pub fn changes_flushed(&mut self, new_size: Option<u64>) {
        self.new_entries.clear();
        self.local_changes = ChangesContainer::new();
        self.size = new_size;
        self.dirty = false;
        self.transaction_dirty = false;
        self.tracker.transaction_clear();
    }

    /// Fold another bag's pending state into this one, e.g. when a
    /// transaction's working copy reconciles with the shared instance.
    /// Relative changes stack; absolute changes override. The size becomes
    /// undefined because the folded diffs have unknown bases here.
    pub fn merge_pending_from<B2: BagBacking>(
        &mut self,
        other: &LinkBag<B2>,
    ) -> Result<(), BagError> {
        for (rid, count) in &other.new_entries {
            for _ in 0..*count {
                self.add(*rid)?;
            }
        }
        let cap = self.counter_max_value;
        for (rid, change) in other.local_changes.iter() {
            match change {
                Change::Diff(d) => {
                    let d = *d;
                    if self
                        .local_changes
                        .update(rid, |c| c.apply_diff(d, cap))
                        .is_none()
                    {
                        self.local_changes.put(*rid, Change::diff(d));
                    }
                }
                absolute => self.local_changes.put(*rid, *absolute),
            }
        }
        self.size = None;
        self.set_dirty();
        Ok(())
    }

    // --- ownership, tracking and dirty state ---

    /// Attach (or detach, with `None`) the owning record. A bag instance
    /// belongs to at most one owner at a time; sharing is refused.
    pub fn set_owner(&mut self, owner: Option<Arc<dyn BagOwner>>) -> Result<(), BagError> {
        if let (Some(new), Some(existing)) = (&owner, &self.owner)
            && !Arc::ptr_eq(existing, new)
        {
            return Err(BagError::AlreadyOwned);
        }
        self.owner = owner;
        Ok(())
    }

    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner(&self) -> Option<Arc<dyn BagOwner>> {
        self.owner.clone()
    }

    pub fn enable_tracking(&mut self) {
        self.tracker.enable();
    }

    pub fn disable_tracking(&mut self) {
        self.tracker.disable();
    }

    pub fn tracker(&self) -> &MultiValueTracker {
        &self.tracker
    }

    /// Take over another bag's tracking history, used when the contents move
    /// to a different backing representation.
    pub fn adopt_tracker(&mut self, other: &MultiValueTracker) {
        self.tracker.source_from(other);
    }

    pub fn is_modified(&self) -> bool {
        if self.tracker.is_enabled() {
            self.tracker.is_modified()
        } else {
            self.dirty
        }
    }

    pub fn is_transaction_modified(&self) -> bool {
        if self.tracker.is_enabled() {
            self.tracker.is_transaction_modified()
        } else {
            self.transaction_dirty
        }
    }

    pub fn transaction_clear(&mut self) {
        self.tracker.transaction_clear();
        self.transaction_dirty = false;
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
        self.transaction_dirty = true;
        if let Some(owner) = &self.owner {
            owner.mark_dirty();
        }
    }

    pub fn set_transaction_dirty(&mut self) {
        self.transaction_dirty = true;
    }

    /// Mark for rewrite without recording a content event, so equality and
    /// rollback see no change but optimistic version checks do.
    pub fn set_dirty_no_changed(&mut self) {
        self.dirty = true;
        self.transaction_dirty = true;
        if let Some(owner) = &self.owner {
            owner.mark_dirty_no_changed();
        }
    }

    fn add_event(&mut self, rid: Rid) {
        if self.tracker.is_enabled() {
            self.tracker.add(rid);
        } else {
            self.set_dirty();
        }
    }

    fn remove_event(&mut self, rid: Rid) {
        if self.tracker.is_enabled() {
            self.tracker.remove(rid);
        } else {
            self.set_dirty();
        }
    }

    /// A copy of this bag as it stood before the given events, produced by
    /// replaying them backwards with each event inverted. Used to restore a
    /// record's loaded state on rollback.
    pub fn return_original_state(&self, events: &[BagEvent]) -> Result<Self, BagError>
    where
        B: Clone,
    {
        let mut reverted = self.clone();
        reverted.tracker = MultiValueTracker::new();
        reverted.owner = None;
        reverted.dirty = false;
        reverted.transaction_dirty = false;
        for event in events.iter().rev() {
            match event.inverted() {
                BagEvent::Add(rid) => {
                    reverted.add(rid)?;
                }
                BagEvent::Remove(rid) => {
                    reverted.remove(rid)?;
                }
            }
        }
        reverted.dirty = false;
        reverted.transaction_dirty = false;
        Ok(reverted)
    }
}

impl LinkBag<EmbeddedBacking> {
    /// Resolve all pending changes into the steady-state map. Entries still
    /// keyed by temporary identifiers must have been finalized first.
    pub fn flush_local(&mut self) -> Result<(), BagError> {
        if let Some((rid, _)) = self.new_entries.iter().next() {
            return Err(BagError::IllegalState(format!(
                "entry {rid} has no assigned identifier at flush time"
            )));
        }
        let mut resolved = Vec::with_capacity(self.local_changes.len());
        for (rid, change) in self.local_changes.iter() {
            resolved.push((*rid, self.resolved_count(rid, change)?));
        }
        self.backing.apply(resolved);
        let total = self.backing.total();
        self.new_entries.clear();
        self.local_changes = ChangesContainer::new();
        self.size = Some(total);
        Ok(())
    }
}

impl LinkBag<TreeBacking> {
    pub fn pointer(&self) -> Option<tarn_common::CollectionPointer> {
        self.backing.pointer()
    }

    /// Queue this bag's pending changes onto the commit context, assigning a
    /// durable collection pointer on first commit. The bag's own state is
    /// untouched; call [`Self::changes_flushed`] once the context has been
    /// materialized.
    pub fn register_pending(
        &mut self,
        manager: &CollectionManager,
        ctx: &mut BagCommitContext,
    ) -> Result<(), BagError> {
        if !self.has_pending() {
            return Ok(());
        }
        let pointer = match self.backing.pointer() {
            Some(pointer) if pointer.is_durable() => pointer,
            Some(provisional) => {
                let durable = manager.allocate_pointer(provisional.file_id)?;
                manager.register_pending_pointer(
                    ctx.session(),
                    provisional.collection_id,
                    durable,
                );
                self.backing.set_pointer(durable);
                durable
            }
            None => {
                let durable = manager.allocate_pointer(self.backing.tree().file_id())?;
                self.backing.set_pointer(durable);
                durable
            }
        };
        let entries = self.pending_changes()?;
        ctx.push(PendingBagOp::Update {
            pointer,
            counter_max_value: self.counter_max_value,
            entries,
        });
        Ok(())
    }

    /// Queue deletion of the stored collection and clear all local state,
    /// leaving an empty shell that must not be used for further reads.
    pub fn confirm_delete(&mut self, ctx: &mut BagCommitContext) -> Result<(), BagError> {
        if let Some(pointer) = self.backing.pointer()
            && pointer.is_durable()
        {
            ctx.push(PendingBagOp::Delete { pointer });
        }
        self.new_entries.clear();
        self.local_changes = ChangesContainer::new();
        self.size = Some(0);
        Ok(())
    }
}

impl<B: BagBacking> Display for LinkBag<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.size {
            Some(size) => write!(f, "LinkBag [size={size}]"),
            None => write!(f, "LinkBag [size=undefined]"),
        }
    }
}
