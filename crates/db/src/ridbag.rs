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
    fmt::{Display, Formatter},
    sync::Arc,
};

use tracing::debug;

use crate::{
    BagOwner, CollectionManager, LinkBag,
    backing::{BagBacking, EmbeddedBacking, TreeBacking},
    change::Change,
    commit::{BagCommitContext, PendingBagOp},
    config::BagConfig,
    cursor::Iter,
    error::BagError,
    tracker::MultiValueTracker,
};
use tarn_common::{CollectionPointer, Rid, RidResolver};

enum BagDelegate {
    Embedded(LinkBag<EmbeddedBacking>),
    Tree(LinkBag<TreeBacking>),
}

/// Self-converting bag: starts embedded, migrates to a shared tree when it
/// grows past the upper threshold, and migrates back down when it shrinks
/// below the (deliberately lower) bottom threshold. Conversions carry the
/// tracking history, owner and dirty state over to the new representation.
pub struct RidBag {
    delegate: BagDelegate,
    manager: Arc<CollectionManager>,
    resolver: Arc<dyn RidResolver>,
    config: BagConfig,
    file_id: i64,
    /// Tree collection left behind by a downward conversion, purged when the
    /// enclosing transaction commits.
    pending_delete: Option<CollectionPointer>,
}

impl RidBag {
    /// A new empty bag, embedded unless embedded storage is disabled.
    pub fn new(
        manager: Arc<CollectionManager>,
        resolver: Arc<dyn RidResolver>,
        config: BagConfig,
        file_id: i64,
    ) -> Result<Self, BagError> {
        let delegate = if config.embedded_to_tree_threshold.is_some() {
            BagDelegate::Embedded(LinkBag::new(
                EmbeddedBacking::new(),
                resolver.clone(),
                config.counter_max_value,
                config.prefetch_batch_size,
            ))
        } else {
            BagDelegate::Tree(new_tree_bag(&manager, &resolver, &config, file_id, None)?)
        };
        Ok(Self {
            delegate,
            manager,
            resolver,
            config,
            file_id,
            pending_delete: None,
        })
    }

    /// Rebuild a tree backed bag from its stored pointer and the change set
    /// serialized alongside it.
    pub fn from_tree_pointer(
        manager: Arc<CollectionManager>,
        resolver: Arc<dyn RidResolver>,
        config: BagConfig,
        pointer: CollectionPointer,
        stored_size: Option<u64>,
        changes: Vec<(Rid, Change)>,
    ) -> Result<Self, BagError> {
        let file_id = pointer.file_id;
        let tree = manager.tree(file_id)?;
        let bag = LinkBag::hydrate(
            TreeBacking::new(tree, Some(pointer)),
            resolver.clone(),
            config.counter_max_value,
            config.prefetch_batch_size,
            stored_size,
            changes,
        );
        Ok(Self {
            delegate: BagDelegate::Tree(bag),
            manager,
            resolver,
            config,
            file_id,
            pending_delete: None,
        })
    }

    /// Rebuild an embedded bag from entries serialized inline with its
    /// owning record.
    pub fn from_embedded_entries(
        manager: Arc<CollectionManager>,
        resolver: Arc<dyn RidResolver>,
        config: BagConfig,
        file_id: i64,
        entries: impl IntoIterator<Item = (Rid, u64)>,
    ) -> Self {
        let backing = EmbeddedBacking::from_entries(entries);
        let total = backing.total();
        let bag = LinkBag::hydrate(
            backing,
            resolver.clone(),
            config.counter_max_value,
            config.prefetch_batch_size,
            Some(total),
            vec![],
        );
        Self {
            delegate: BagDelegate::Embedded(bag),
            manager,
            resolver,
            config,
            file_id,
            pending_delete: None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.delegate, BagDelegate::Embedded(_))
    }

    pub fn pointer(&self) -> Option<CollectionPointer> {
        match &self.delegate {
            BagDelegate::Embedded(_) => None,
            BagDelegate::Tree(bag) => bag.pointer(),
        }
    }

    pub fn add(&mut self, rid: Rid) -> Result<bool, BagError> {
        let grew = match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.add(rid)?,
            BagDelegate::Tree(bag) => bag.add(rid)?,
        };
        self.check_and_convert()?;
        Ok(grew)
    }

    pub fn add_all(&mut self, rids: impl IntoIterator<Item = Rid>) -> Result<(), BagError> {
        for rid in rids {
            self.add(rid)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, rid: Rid) -> Result<bool, BagError> {
        let removed = match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.remove(rid)?,
            BagDelegate::Tree(bag) => bag.remove(rid)?,
        };
        self.check_and_convert()?;
        Ok(removed)
    }

    pub fn contains(&self, rid: Rid) -> Result<bool, BagError> {
        match &self.delegate {
            BagDelegate::Embedded(bag) => bag.contains(rid),
            BagDelegate::Tree(bag) => bag.contains(rid),
        }
    }

    pub fn size(&self) -> Option<u64> {
        match &self.delegate {
            BagDelegate::Embedded(bag) => bag.size(),
            BagDelegate::Tree(bag) => bag.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == Some(0)
    }

    /// Recompute the size by walking the backing; tree representation only.
    pub fn update_size(&mut self) -> Result<u64, BagError> {
        let size = match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.update_size()?,
            BagDelegate::Tree(bag) => bag.update_size()?,
        };
        self.check_and_convert()?;
        Ok(size)
    }

    pub fn iter(&self) -> RidBagIter<'_> {
        match &self.delegate {
            BagDelegate::Embedded(bag) => RidBagIter::Embedded(bag.iter()),
            BagDelegate::Tree(bag) => RidBagIter::Tree(bag.iter()),
        }
    }

    /// Re-key one never-persisted entry once its record got an identifier.
    pub fn finalize_new_entry(&mut self, temp: Rid, assigned: Rid) -> Result<(), BagError> {
        match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.finalize_new_entry(temp, assigned),
            BagDelegate::Tree(bag) => bag.finalize_new_entry(temp, assigned),
        }
    }

    // --- ownership, tracking and dirty state, forwarded to the delegate ---

    pub fn set_owner(&mut self, owner: Option<Arc<dyn BagOwner>>) -> Result<(), BagError> {
        match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.set_owner(owner),
            BagDelegate::Tree(bag) => bag.set_owner(owner),
        }
    }

    pub fn enable_tracking(&mut self) {
        match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.enable_tracking(),
            BagDelegate::Tree(bag) => bag.enable_tracking(),
        }
    }

    pub fn disable_tracking(&mut self) {
        match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.disable_tracking(),
            BagDelegate::Tree(bag) => bag.disable_tracking(),
        }
    }

    pub fn tracker(&self) -> &MultiValueTracker {
        match &self.delegate {
            BagDelegate::Embedded(bag) => bag.tracker(),
            BagDelegate::Tree(bag) => bag.tracker(),
        }
    }

    pub fn is_modified(&self) -> bool {
        match &self.delegate {
            BagDelegate::Embedded(bag) => bag.is_modified(),
            BagDelegate::Tree(bag) => bag.is_modified(),
        }
    }

    pub fn is_transaction_modified(&self) -> bool {
        match &self.delegate {
            BagDelegate::Embedded(bag) => bag.is_transaction_modified(),
            BagDelegate::Tree(bag) => bag.is_transaction_modified(),
        }
    }

    pub fn transaction_clear(&mut self) {
        match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.transaction_clear(),
            BagDelegate::Tree(bag) => bag.transaction_clear(),
        }
    }

    pub fn set_dirty_no_changed(&mut self) {
        match &mut self.delegate {
            BagDelegate::Embedded(bag) => bag.set_dirty_no_changed(),
            BagDelegate::Tree(bag) => bag.set_dirty_no_changed(),
        }
    }

    /// The bag as it stood before the given events, in the same
    /// representation.
    pub fn return_original_state(
        &self,
        events: &[crate::tracker::BagEvent],
    ) -> Result<Self, BagError> {
        let delegate = match &self.delegate {
            BagDelegate::Embedded(bag) => {
                BagDelegate::Embedded(bag.return_original_state(events)?)
            }
            BagDelegate::Tree(bag) => BagDelegate::Tree(bag.return_original_state(events)?),
        };
        Ok(Self {
            delegate,
            manager: self.manager.clone(),
            resolver: self.resolver.clone(),
            config: self.config.clone(),
            file_id: self.file_id,
            pending_delete: None,
        })
    }

    /// Queue this bag's durable work onto a commit context: the tree update
    /// for a tree backed bag, plus the purge of any collection abandoned by
    /// a downward conversion. Embedded contents are serialized inline with
    /// the owning record and need nothing here.
    pub fn register_pending(&mut self, ctx: &mut BagCommitContext) -> Result<(), BagError> {
        if let Some(pointer) = self.pending_delete.take() {
            ctx.push(PendingBagOp::Delete { pointer });
        }
        if let BagDelegate::Tree(bag) = &mut self.delegate {
            bag.register_pending(&self.manager, ctx)?;
        }
        Ok(())
    }

    /// Forget pending state once the commit context has been materialized.
    /// Fails, leaving the bag untouched, while any entry is still keyed by a
    /// temporary identifier.
    pub fn changes_flushed(&mut self) -> Result<(), BagError> {
        match &mut self.delegate {
            // Embedded pending state folds into the in-memory map rather
            // than a store.
            BagDelegate::Embedded(bag) => bag.flush_local(),
            BagDelegate::Tree(bag) => {
                let size = bag.size();
                bag.changes_flushed(size);
                Ok(())
            }
        }
    }

    fn check_and_convert(&mut self) -> Result<(), BagError> {
        match &self.delegate {
            BagDelegate::Embedded(bag) => {
                let Some(top) = self.config.embedded_to_tree_threshold else {
                    return Ok(());
                };
                if bag.size().is_some_and(|s| s > top) {
                    self.convert_to_tree()?;
                }
            }
            BagDelegate::Tree(bag) => {
                let Some(bottom) = self.config.tree_to_embedded_threshold else {
                    return Ok(());
                };
                // A bag that was ever committed as a tree stays a tree until
                // its size is known again.
                if bag.size().is_some_and(|s| s < bottom) {
                    self.convert_to_embedded()?;
                }
            }
        }
        Ok(())
    }

    fn convert_to_tree(&mut self) -> Result<(), BagError> {
        let BagDelegate::Embedded(old) = &self.delegate else {
            return Ok(());
        };
        debug!(size = ?old.size(), "Converting embedded bag to tree");
        let contents: Result<Vec<Rid>, BagError> = old.iter().collect();
        let mut new = new_tree_bag(
            &self.manager,
            &self.resolver,
            &self.config,
            self.file_id,
            None,
        )?;
        new.add_all(contents?)?;
        carry_over(old, &mut new)?;
        self.delegate = BagDelegate::Tree(new);
        Ok(())
    }

    fn convert_to_embedded(&mut self) -> Result<(), BagError> {
        let BagDelegate::Tree(old) = &self.delegate else {
            return Ok(());
        };
        debug!(size = ?old.size(), "Converting tree bag to embedded");
        let contents: Result<Vec<Rid>, BagError> = old.iter().collect();
        let mut new = LinkBag::new(
            EmbeddedBacking::new(),
            self.resolver.clone(),
            self.config.counter_max_value,
            self.config.prefetch_batch_size,
        );
        new.add_all(contents?)?;
        carry_over(old, &mut new)?;
        // The stored collection is now orphaned; purge it at commit.
        if let Some(pointer) = old.pointer()
            && pointer.is_durable()
        {
            self.pending_delete = Some(pointer);
        }
        self.delegate = BagDelegate::Embedded(new);
        Ok(())
    }
}

fn new_tree_bag(
    manager: &Arc<CollectionManager>,
    resolver: &Arc<dyn RidResolver>,
    config: &BagConfig,
    file_id: i64,
    pointer: Option<CollectionPointer>,
) -> Result<LinkBag<TreeBacking>, BagError> {
    let tree = manager.tree(file_id)?;
    Ok(LinkBag::new(
        TreeBacking::new(tree, pointer),
        resolver.clone(),
        config.counter_max_value,
        config.prefetch_batch_size,
    ))
}

/// Move tracking history, owner and dirty state from the old representation
/// to the new one. The copy itself happened with tracking disabled, so the
/// new bag's timeline is exactly the old one's.
fn carry_over<B1: BagBacking, B2: BagBacking>(
    old: &LinkBag<B1>,
    new: &mut LinkBag<B2>,
) -> Result<(), BagError> {
    new.adopt_tracker(old.tracker());
    new.set_owner(old.owner())?;
    if old.is_modified() {
        new.set_dirty();
    }
    if old.is_transaction_modified() {
        new.set_transaction_dirty();
    }
    Ok(())
}

pub enum RidBagIter<'a> {
    Embedded(Iter<'a, EmbeddedBacking>),
    Tree(Iter<'a, TreeBacking>),
}

impl Iterator for RidBagIter<'_> {
    type Item = Result<Rid, BagError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RidBagIter::Embedded(iter) => iter.next(),
            RidBagIter::Tree(iter) => iter.next(),
        }
    }
}

/// Bags are equal when ordered iteration yields the same multiset. An
/// undefined size on either side does not preclude equality; the contents
/// decide.
impl PartialEq for RidBag {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.iter();
        let mut b = other.iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(Ok(x)), Some(Ok(y))) if x == y => continue,
                _ => return false,
            }
        }
    }
}

impl Display for RidBag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.delegate {
            BagDelegate::Embedded(bag) => write!(f, "{bag}"),
            BagDelegate::Tree(bag) => write!(f, "{bag}"),
        }
    }
}
