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
use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum RidError {
    #[error("identifier {0} is not persistent")]
    NotPersistent(Rid),
    #[error("temporary identifier {0} is already bound")]
    AlreadyBound(TempRid),
}

/// Handle for an identifier that has been allocated in-process but not yet
/// assigned a durable position. Handles order by allocation sequence.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct TempRid(pub u64);

impl Display for TempRid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#tmp:{}", self.0)
    }
}

/// A reference to a stored record.
///
/// Identifiers are immutable. A record that has not yet been flushed to
/// storage is referred to through a `Temp` handle; once the record is made
/// durable, the handle is *bound* to the permanent identifier in the session's
/// [`RidMap`] and callers re-resolve through [`RidResolver::canonical`].
/// Nothing ever changes its comparison key after being stored in a sorted
/// structure.
///
/// Persistent identifiers order by (cluster, position); temporary ones order
/// among themselves by allocation sequence, after all persistent ones.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub enum Rid {
    Persistent { cluster: i32, position: i64 },
    Temp(TempRid),
}

impl Rid {
    pub const fn new(cluster: i32, position: i64) -> Self {
        Rid::Persistent { cluster, position }
    }

    pub const fn is_persistent(&self) -> bool {
        matches!(self, Rid::Persistent { .. })
    }

    pub const fn is_temporary(&self) -> bool {
        matches!(self, Rid::Temp(_))
    }

    /// A persistent identifier is addressable only with non-negative
    /// coordinates. Temporary handles are always valid.
    pub const fn is_valid(&self) -> bool {
        match self {
            Rid::Persistent { cluster, position } => *cluster >= 0 && *position >= 0,
            Rid::Temp(_) => true,
        }
    }

    /// Order-preserving big-endian key encoding, defined for persistent
    /// identifiers only. The sign bit is flipped so that unsigned byte order
    /// matches the signed logical order.
    pub fn key_bytes(&self) -> Result<[u8; 12], RidError> {
        let Rid::Persistent { cluster, position } = self else {
            return Err(RidError::NotPersistent(*self));
        };
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&((*cluster as u32) ^ (1 << 31)).to_be_bytes());
        out[4..12].copy_from_slice(&((*position as u64) ^ (1 << 63)).to_be_bytes());
        Ok(out)
    }

    pub fn from_key_bytes(bytes: &[u8; 12]) -> Self {
        let cluster = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) ^ (1 << 31);
        let position = u64::from_be_bytes(bytes[4..12].try_into().unwrap()) ^ (1 << 63);
        Rid::Persistent {
            cluster: cluster as i32,
            position: position as i64,
        }
    }
}

impl Display for Rid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Rid::Persistent { cluster, position } => write!(f, "#{cluster}:{position}"),
            Rid::Temp(t) => write!(f, "{t}"),
        }
    }
}

/// Resolves an identifier to its current canonical form. Persistent
/// identifiers always resolve to themselves; a temporary handle resolves to
/// whatever it has been bound to so far (possibly itself).
pub trait RidResolver: Send + Sync {
    fn canonical(&self, rid: Rid) -> Rid;
}

/// The indirection table mapping temporary handles to their current best
/// known identifier. One per session; bags consult it instead of listening
/// for in-place identity mutations.
pub struct RidMap {
    next: AtomicU64,
    bindings: RwLock<HashMap<TempRid, Rid>>,
}

impl Default for RidMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RidMap {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh temporary identifier.
    pub fn allocate(&self) -> Rid {
        Rid::Temp(TempRid(self.next.fetch_add(1, Ordering::Relaxed)))
    }

    /// Bind a temporary handle to its assigned identifier. Binding twice is
    /// an error; the handle's meaning must never change after the fact.
    pub fn bind(&self, temp: TempRid, assigned: Rid) -> Result<(), RidError> {
        let mut bindings = self.bindings.write().unwrap();
        if bindings.contains_key(&temp) {
            return Err(RidError::AlreadyBound(temp));
        }
        bindings.insert(temp, assigned);
        Ok(())
    }
}

impl RidResolver for RidMap {
    fn canonical(&self, rid: Rid) -> Rid {
        let bindings = self.bindings.read().unwrap();
        let mut current = rid;
        while let Rid::Temp(t) = current {
            match bindings.get(&t) {
                Some(next) => current = *next,
                None => break,
            }
        }
        current
    }
}
