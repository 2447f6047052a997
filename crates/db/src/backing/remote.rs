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

use std::sync::Arc;

use crate::{backing::BagBacking, error::BagError};
use tarn_common::{CollectionPointer, Rid};

/// Transport for asking a server about a collection that is not materialized
/// locally. Queries are addressed by the owning record and field so the
/// server can locate the collection without shipping it over.
pub trait RemoteBagClient: Send + Sync {
    fn absolute_value(&self, owner: Rid, field: &str, rid: Rid) -> Result<u64, BagError>;

    fn collection_size(
        &self,
        owner: Rid,
        field: &str,
        pointer: CollectionPointer,
    ) -> Result<u64, BagError>;
}

/// Client-side stub over a server-resident collection. Point lookups and
/// size queries go over the wire; anything that would require streaming the
/// whole collection fails loudly instead of degrading.
pub struct RemoteStubBacking {
    pointer: CollectionPointer,
    owner: Rid,
    field: String,
    client: Arc<dyn RemoteBagClient>,
}

impl RemoteStubBacking {
    pub fn new(
        pointer: CollectionPointer,
        owner: Rid,
        field: impl Into<String>,
        client: Arc<dyn RemoteBagClient>,
    ) -> Self {
        Self {
            pointer,
            owner,
            field: field.into(),
            client,
        }
    }

    pub fn pointer(&self) -> CollectionPointer {
        self.pointer
    }

    /// Total size of the server-side collection, excluding any local pending
    /// changes.
    pub fn remote_size(&self) -> Result<u64, BagError> {
        self.client
            .collection_size(self.owner, &self.field, self.pointer)
    }
}

impl BagBacking for RemoteStubBacking {
    fn kind(&self) -> &'static str {
        "remote"
    }

    fn absolute_value(&self, rid: &Rid) -> Result<u64, BagError> {
        self.client.absolute_value(self.owner, &self.field, *rid)
    }

    fn read_batch(
        &self,
        _after: Option<&Rid>,
        _limit: usize,
    ) -> Result<Vec<(Rid, u64)>, BagError> {
        Err(BagError::UnsupportedOperation("remote", "scan"))
    }

    fn stored_size(&self) -> Result<Option<u64>, BagError> {
        self.remote_size().map(Some)
    }

    fn supports_update_size(&self) -> bool {
        true
    }

    fn supports_delete(&self) -> bool {
        false
    }
}
