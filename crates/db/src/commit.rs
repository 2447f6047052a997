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
use tarn_common::{CollectionPointer, Rid};
use uuid::Uuid;

/// One deferred tree mutation, queued during commit and applied in bulk by
/// [`crate::CollectionManager::materialize`].
#[derive(Clone, Debug)]
pub enum PendingBagOp {
    /// Fold the given changes into the collection's stored counts. Entries
    /// must be keyed by persistent identifiers.
    Update {
        pointer: CollectionPointer,
        counter_max_value: u32,
        entries: Vec<(Rid, Change)>,
    },
    /// Drop the collection's stored entries entirely.
    Delete { pointer: CollectionPointer },
}

/// Accumulates the tree mutations of one committing transaction so they can
/// be applied together once record identifiers have all been assigned.
#[derive(Debug)]
pub struct BagCommitContext {
    session: Uuid,
    ops: Vec<PendingBagOp>,
}

impl BagCommitContext {
    pub fn new(session: Uuid) -> Self {
        Self {
            session,
            ops: Vec::new(),
        }
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn push(&mut self, op: PendingBagOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[PendingBagOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<PendingBagOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}
