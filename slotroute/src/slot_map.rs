//! Slot Map
//!
//! Partial slot -> node address cache. Rebuilt wholesale from discovery and
//! corrected one slot at a time from `MOVED` replies.

use crate::node::NodeAddress;
use crate::slot::{SlotId, TOTAL_SLOTS};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// Slot ownership cache
#[derive(Debug, Default)]
pub struct SlotMap {
    slots: RwLock<HashMap<SlotId, NodeAddress>>,
}

impl SlotMap {
    /// Create an empty slot map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(slot range, owner)` assignments
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (RangeInclusive<SlotId>, NodeAddress)>,
    {
        let map = Self::new();
        map.rebuild(ranges);
        map
    }

    /// Current owner of a slot
    pub fn owner(&self, slot: SlotId) -> Option<NodeAddress> {
        self.slots.read().get(&slot).cloned()
    }

    /// Point a single slot at a new owner, returning the previous one
    pub fn update(&self, slot: SlotId, address: NodeAddress) -> Option<NodeAddress> {
        debug!(slot, address = %address, "Slot owner updated");
        self.slots.write().insert(slot, address)
    }

    /// Assign every slot of a range to one owner
    pub fn assign_range(&self, range: RangeInclusive<SlotId>, address: &NodeAddress) {
        let mut slots = self.slots.write();
        for slot in range {
            if slot >= TOTAL_SLOTS {
                break;
            }
            slots.insert(slot, address.clone());
        }
    }

    /// Replace the whole map
    pub fn rebuild<I>(&self, ranges: I)
    where
        I: IntoIterator<Item = (RangeInclusive<SlotId>, NodeAddress)>,
    {
        let mut fresh = HashMap::with_capacity(TOTAL_SLOTS as usize);
        for (range, address) in ranges {
            for slot in range.filter(|s| *s < TOTAL_SLOTS) {
                fresh.insert(slot, address.clone());
            }
        }

        let count = fresh.len();
        *self.slots.write() = fresh;
        info!("Slot map rebuilt with {} slots assigned", count);
    }

    /// Number of mapped slots
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Check if every slot has an owner
    pub fn has_full_coverage(&self) -> bool {
        self.len() == TOTAL_SLOTS as usize
    }

    /// Get slot coverage percentage
    pub fn slot_coverage(&self) -> f64 {
        (self.len() as f64 / TOTAL_SLOTS as f64) * 100.0
    }

    /// Distinct owners, sorted
    pub fn owners(&self) -> Vec<NodeAddress> {
        let mut owners: Vec<NodeAddress> = self.slots.read().values().cloned().collect();
        owners.sort();
        owners.dedup();
        owners
    }
}
