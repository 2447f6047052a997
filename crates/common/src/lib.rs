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

//! Value types shared across the tarn storage engine: record identifiers
//! (with their temporary/persistent lifecycle) and pointers to logical
//! collections inside shared tree files.

mod pointer;
mod rid;

pub use pointer::CollectionPointer;
pub use rid::{Rid, RidError, RidMap, RidResolver, TempRid};
