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

mod embedded;
mod remote;
mod tree;

pub use embedded::EmbeddedBacking;
pub use remote::{RemoteBagClient, RemoteStubBacking};
pub use tree::{CollectionTree, TreeBacking, TreeGuard};

use crate::error::BagError;
use tarn_common::Rid;

/// The persisted tier underneath a bag: whatever counts were already stored
/// when the bag was loaded. The in-memory engine layers its pending changes
/// over this through [`crate::LinkBag`].
///
/// Capability differences between backings surface as
/// [`BagError::UnsupportedOperation`] rather than silent degradation.
pub trait BagBacking: Send {
    /// Short name used in logging and unsupported-operation errors.
    fn kind(&self) -> &'static str;

    /// The stored multiplicity of one identifier, zero if absent.
    fn absolute_value(&self, rid: &Rid) -> Result<u64, BagError>;

    /// Up to `limit` stored entries in ascending identifier order, strictly
    /// after `after` (from the beginning when `None`). Entries with zero
    /// counts are never returned.
    fn read_batch(&self, after: Option<&Rid>, limit: usize)
    -> Result<Vec<(Rid, u64)>, BagError>;

    /// The stored total across the whole collection, for backings that can
    /// answer it without a scan. `None` when only a walk can compute it.
    fn stored_size(&self) -> Result<Option<u64>, BagError>;

    /// Whether [`crate::LinkBag::update_size`] can walk this backing.
    fn supports_update_size(&self) -> bool;

    /// Whether the stored collection as a whole may be scheduled for
    /// deletion.
    fn supports_delete(&self) -> bool;
}
