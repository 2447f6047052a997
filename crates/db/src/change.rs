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

/// A pending mutation to one identifier's multiplicity, layered over whatever
/// the backing store holds for that identifier.
///
/// `Absolute(Some(n))` pins the count to `n` regardless of the stored value.
/// `Absolute(None)` marks the count as unknown: something happened that lost
/// track of the precise value, and the true count must be re-read from the
/// backing store before it can be used. `Diff(d)` is a relative adjustment
/// applied to the stored value at resolution time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Absolute(Option<u32>),
    Diff(i64),
}

/// Outcome of [`Change::decrement`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decrement {
    /// The count was positive and is now one lower.
    Applied,
    /// The decrement was recorded but the resulting count is unknown; the
    /// caller must invalidate any cached size.
    AppliedUnknown,
    /// The count was already zero; nothing was removed.
    Unchanged,
}

impl Change {
    pub const fn absolute(value: u32) -> Self {
        Change::Absolute(Some(value))
    }

    pub const fn undefined() -> Self {
        Change::Absolute(None)
    }

    pub const fn diff(delta: i64) -> Self {
        Change::Diff(delta)
    }

    pub const fn is_undefined(&self) -> bool {
        matches!(self, Change::Absolute(None))
    }

    /// Raise the multiplicity by one, saturating at `cap`. Returns whether
    /// the count actually grew. An undefined absolute stays undefined but
    /// reports growth, since the true count may well be below the cap.
    pub fn increment(&mut self, cap: u32) -> bool {
        match self {
            Change::Absolute(Some(v)) => {
                if *v >= cap {
                    false
                } else {
                    *v += 1;
                    true
                }
            }
            Change::Absolute(None) => true,
            Change::Diff(d) => {
                if *d >= i64::from(cap) {
                    false
                } else {
                    *d += 1;
                    true
                }
            }
        }
    }

    /// Lower the multiplicity by one. A known-zero absolute refuses; a diff
    /// always records the decrement but cannot know whether anything was in
    /// fact removed, so it reports [`Decrement::AppliedUnknown`].
    pub fn decrement(&mut self) -> Decrement {
        match self {
            Change::Absolute(Some(v)) => {
                if *v == 0 {
                    Decrement::Unchanged
                } else {
                    *v -= 1;
                    Decrement::Applied
                }
            }
            Change::Absolute(None) => Decrement::AppliedUnknown,
            Change::Diff(d) => {
                *d -= 1;
                Decrement::AppliedUnknown
            }
        }
    }

    /// Fold a relative adjustment into this change.
    pub fn apply_diff(&mut self, delta: i64, cap: u32) {
        match self {
            Change::Absolute(Some(v)) => {
                *v = (i64::from(*v) + delta).clamp(0, i64::from(cap)) as u32;
            }
            // An unknown count stays unknown regardless of adjustments.
            Change::Absolute(None) => {}
            Change::Diff(d) => *d += delta,
        }
    }

    /// Resolve against the stored count. `None` means the change is an
    /// undefined absolute and the stored count itself is the best answer.
    pub fn resolve(&self, base: u64, cap: u32) -> Option<u64> {
        match self {
            Change::Absolute(Some(v)) => Some(u64::from(*v)),
            Change::Absolute(None) => None,
            Change::Diff(d) => {
                let base = base.min(u64::from(u32::MAX)) as i64;
                Some((base + *d).clamp(0, i64::from(cap)) as u64)
            }
        }
    }
}
