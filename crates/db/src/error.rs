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

use tarn_common::Rid;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum BagError {
    #[error("invalid record identifier: {0}")]
    InvalidRid(Rid),
    #[error("operation `{1}` is not supported by the {0} backing")]
    UnsupportedOperation(&'static str, &'static str),
    #[error(
        "this bag is already owned by another record; create a new bag and copy the contents \
         instead of sharing the instance"
    )]
    AlreadyOwned,
    #[error("no collection pointer assigned to tree backed bag")]
    NoCollectionPointer,
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("retrieval error from backing store: {0}")]
    RetrievalFailure(String),
    #[error("store failure when writing to backing store: {0}")]
    StorageFailure(String),
    #[error("encoding error")]
    EncodingFailure,
}
