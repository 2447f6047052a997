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

//! Link collections for the tarn storage engine.
//!
//! A [`LinkBag`] is a counted multiset of record identifiers layered over a
//! persisted tier: a plain in-memory map for small bags
//! ([`backing::EmbeddedBacking`]), a collection multiplexed into a shared
//! fjall partition for large ones ([`backing::TreeBacking`]), or a stub over
//! a server-resident collection ([`backing::RemoteStubBacking`]). The
//! [`RidBag`] facade converts between the first two representations as the
//! bag grows and shrinks across thresholds.
//!
//! Mutations accumulate as pending changes, tracked by a
//! [`MultiValueTracker`] timeline for rollback, and are made durable through
//! a [`BagCommitContext`] that the [`CollectionManager`] materializes at
//! transaction commit.

pub mod backing;
mod bag;
mod change;
mod changes_container;
mod collection_manager;
mod commit;
mod config;
mod cursor;
mod error;
mod ridbag;
mod tracker;

pub use bag::{BagOwner, LinkBag};
pub use change::{Change, Decrement};
pub use changes_container::ChangesContainer;
pub use collection_manager::CollectionManager;
pub use commit::{BagCommitContext, PendingBagOp};
pub use config::{
    BagConfig, DEFAULT_EMBEDDED_TO_TREE_THRESHOLD, DEFAULT_PREFETCH_BATCH_SIZE,
    DEFAULT_TREE_TO_EMBEDDED_THRESHOLD, TableConfig,
};
pub use cursor::{BagCursor, Iter};
pub use error::BagError;
pub use ridbag::{RidBag, RidBagIter};
pub use tracker::{BagEvent, MultiValueTracker};

mod bag_tests;
