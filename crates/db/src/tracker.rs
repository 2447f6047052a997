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
use tarn_common::Rid;

/// One recorded mutation of a bag's contents.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BagEvent {
    Add(Rid),
    Remove(Rid),
}

impl BagEvent {
    /// The event that undoes this one.
    pub const fn inverted(&self) -> BagEvent {
        match self {
            BagEvent::Add(rid) => BagEvent::Remove(*rid),
            BagEvent::Remove(rid) => BagEvent::Add(*rid),
        }
    }
}

/// Records add/remove events against a bag while enabled, on two horizons:
/// the full timeline since tracking began, and a per-transaction timeline
/// that the owner clears at each transaction boundary. The full timeline is
/// what rollback replays in reverse.
#[derive(Clone, Debug, Default)]
pub struct MultiValueTracker {
    enabled: bool,
    timeline: Vec<BagEvent>,
    tx_timeline: Vec<BagEvent>,
}

impl MultiValueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.timeline.clear();
        self.tx_timeline.clear();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.timeline.clear();
        self.tx_timeline.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn add(&mut self, rid: Rid) {
        if self.enabled {
            self.timeline.push(BagEvent::Add(rid));
            self.tx_timeline.push(BagEvent::Add(rid));
        }
    }

    pub fn remove(&mut self, rid: Rid) {
        if self.enabled {
            self.timeline.push(BagEvent::Remove(rid));
            self.tx_timeline.push(BagEvent::Remove(rid));
        }
    }

    pub fn timeline(&self) -> &[BagEvent] {
        &self.timeline
    }

    pub fn transaction_timeline(&self) -> &[BagEvent] {
        &self.tx_timeline
    }

    pub fn transaction_clear(&mut self) {
        self.tx_timeline.clear();
    }

    /// Whether any mutation has been recorded since tracking began.
    pub fn is_modified(&self) -> bool {
        !self.timeline.is_empty()
    }

    pub fn is_transaction_modified(&self) -> bool {
        !self.tx_timeline.is_empty()
    }

    /// Take over another tracker's state, e.g. when a bag changes its
    /// backing representation and the new instance must keep the history.
    pub fn source_from(&mut self, other: &MultiValueTracker) {
        self.enabled = other.enabled;
        self.timeline = other.timeline.clone();
        self.tx_timeline = other.tx_timeline.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disabled_tracker_records_nothing() {
        let mut t = MultiValueTracker::new();
        t.add(Rid::new(0, 1));
        assert!(!t.is_modified());
        assert!(t.timeline().is_empty());
    }

    #[test]
    fn test_two_horizons() {
        let mut t = MultiValueTracker::new();
        t.enable();
        t.add(Rid::new(0, 1));
        t.transaction_clear();
        t.remove(Rid::new(0, 1));

        assert_eq!(
            t.timeline(),
            &[BagEvent::Add(Rid::new(0, 1)), BagEvent::Remove(Rid::new(0, 1))]
        );
        assert_eq!(t.transaction_timeline(), &[BagEvent::Remove(Rid::new(0, 1))]);
    }

    #[test]
    fn test_inversion() {
        assert_eq!(
            BagEvent::Add(Rid::new(1, 2)).inverted(),
            BagEvent::Remove(Rid::new(1, 2))
        );
    }
}
