//! Sparse offset map shared by pools and blocks
//!
//! Offsets run from 0 to `capacity - 1` but only occupied offsets are stored,
//! so a /48 carved into /64s costs nothing until blocks are actually issued.

use crate::models::{AddressFamily, Marker};
use std::collections::BTreeMap;

/// Content of an occupied offset
#[derive(Debug, Clone)]
pub(crate) enum Slot<T> {
    /// Permanent, never handed out
    Marker(Marker),
    /// Live entry
    Entry(T),
}

/// Offset-keyed sparse map with first-fit search
#[derive(Debug)]
pub(crate) struct SlotMap<T> {
    capacity: u128,
    slots: BTreeMap<u128, Slot<T>>,
}

impl<T> SlotMap<T> {
    /// Map for a pool: offset 0 is always the network address, and the top
    /// offset is the broadcast address for IPv4 ranges with more than one slot.
    pub fn for_pool(capacity: u128, family: AddressFamily) -> Self {
        let mut map = Self {
            capacity,
            slots: BTreeMap::new(),
        };
        map.seat_marker(0, Marker::NetworkAddress);
        if family.has_broadcast() && capacity > 1 {
            map.seat_marker(capacity - 1, Marker::BroadcastAddress);
        }
        map
    }

    /// Map for a block: single-address blocks carry no markers at all
    pub fn for_block(capacity: u128, family: AddressFamily) -> Self {
        if capacity == 1 {
            return Self {
                capacity,
                slots: BTreeMap::new(),
            };
        }
        Self::for_pool(capacity, family)
    }

    /// Seat a permanent marker at a vacant offset
    ///
    /// Returns false if the offset is out of range or already occupied.
    pub fn seat_marker(&mut self, offset: u128, marker: Marker) -> bool {
        if offset >= self.capacity || self.slots.contains_key(&offset) {
            return false;
        }
        self.slots.insert(offset, Slot::Marker(marker));
        true
    }

    /// Lowest offset absent from the map
    pub fn first_free(&self) -> Option<u128> {
        let mut candidate = 0u128;
        for &offset in self.slots.keys() {
            if offset != candidate {
                break;
            }
            candidate += 1;
        }
        (candidate < self.capacity).then_some(candidate)
    }

    pub fn get(&self, offset: u128) -> Option<&Slot<T>> {
        self.slots.get(&offset)
    }

    /// Store a live entry, replacing any previous entry at that offset
    ///
    /// Markers are never overwritten; returns false in that case.
    pub fn insert_entry(&mut self, offset: u128, entry: T) -> bool {
        if offset >= self.capacity {
            return false;
        }
        if let Some(Slot::Marker(_)) = self.slots.get(&offset) {
            return false;
        }
        self.slots.insert(offset, Slot::Entry(entry));
        true
    }

    /// Remove a live entry; markers stay in place
    pub fn remove_entry(&mut self, offset: u128) -> Option<T> {
        match self.slots.get(&offset) {
            Some(Slot::Entry(_)) => match self.slots.remove(&offset) {
                Some(Slot::Entry(entry)) => Some(entry),
                _ => None,
            },
            _ => None,
        }
    }

    /// Live entries in offset order
    pub fn entries(&self) -> impl Iterator<Item = (u128, &T)> {
        self.slots.iter().filter_map(|(&offset, slot)| match slot {
            Slot::Entry(entry) => Some((offset, entry)),
            Slot::Marker(_) => None,
        })
    }

    pub fn has_entries(&self) -> bool {
        self.entries().next().is_some()
    }

    /// Occupied offsets, markers included
    pub fn occupied(&self) -> u128 {
        self.slots.len() as u128
    }

    /// Offsets absent from the map
    pub fn free(&self) -> u128 {
        self.capacity - self.occupied()
    }
}
