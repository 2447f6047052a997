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

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Locator for one logical collection living inside a shared tree file.
///
/// Many collections share one physical file; the collection id is embedded
/// in every tree key to keep them apart. A negative collection id denotes a
/// collection that has not yet been assigned a durable position.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct CollectionPointer {
    pub file_id: i64,
    pub collection_id: i64,
}

impl CollectionPointer {
    pub const fn new(file_id: i64, collection_id: i64) -> Self {
        Self {
            file_id,
            collection_id,
        }
    }

    /// Whether this pointer refers to a durably positioned collection.
    pub const fn is_durable(&self) -> bool {
        self.collection_id >= 0
    }
}

impl Display for CollectionPointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.collection_id, self.file_id)
    }
}
