//! Slot table of connected units.
//!
//! A slot is the bridge's logical controller number. It is free, or it holds
//! a unit and, while that unit is visible to games, its pad handle.

use super::unit::DeviceUnit;
use crate::pad::PadHandle;
use crate::usb::DeviceId;
use std::sync::Arc;

pub const MAX_SLOTS: usize = 7;

#[derive(Debug, Default)]
pub struct Slot {
    pub unit: Option<Arc<DeviceUnit>>,
    pub handle: Option<PadHandle>,
}

impl Slot {
    pub fn is_connected(&self) -> bool {
        self.unit.is_some()
    }
}

#[derive(Debug)]
pub struct Registry {
    slots: Vec<Slot>,
    // Next slot handed out; advances past the last one bound
    cursor: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_SLOTS).map(|_| Slot::default()).collect(),
            cursor: 0,
        }
    }

    pub fn connected(&self) -> usize {
        self.slots.iter().filter(|s| s.is_connected()).count()
    }

    pub fn has_free_slot(&self) -> bool {
        self.connected() < MAX_SLOTS
    }

    /// First free slot at or after the cursor, wrapping around.
    pub fn free_slot(&self) -> Option<usize> {
        (0..MAX_SLOTS)
            .map(|offset| (self.cursor + offset) % MAX_SLOTS)
            .find(|&i| !self.slots[i].is_connected())
    }

    /// Put `unit` into its slot. The slot must be free.
    pub fn bind(&mut self, unit: Arc<DeviceUnit>) -> bool {
        let index = unit.slot();
        match self.slots.get_mut(index) {
            Some(slot) if !slot.is_connected() => {
                slot.unit = Some(unit);
                slot.handle = None;
                self.cursor = (index + 1) % MAX_SLOTS;
                true
            }
            _ => false,
        }
    }

    /// Empty a slot, returning what it held.
    pub fn release(&mut self, index: usize) -> Option<Slot> {
        let slot = self.slots.get_mut(index)?;
        if !slot.is_connected() {
            return None;
        }
        Some(std::mem::take(slot))
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    /// Indices of every slot owned by `device`.
    pub fn slots_of(&self, device: DeviceId) -> Vec<usize> {
        self.connected_slots()
            .filter(|(_, unit)| unit.device == device)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn connected_slots(&self) -> impl Iterator<Item = (usize, &Arc<DeviceUnit>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.unit.as_ref().map(|u| (i, u)))
    }

    /// Connected units that currently hold a pad handle.
    pub fn registered(&self) -> Vec<(Arc<DeviceUnit>, PadHandle)> {
        self.slots
            .iter()
            .filter_map(|s| match (&s.unit, s.handle) {
                (Some(unit), Some(handle)) => Some((Arc::clone(unit), handle)),
                _ => None,
            })
            .collect()
    }

    pub fn occupied(&self) -> Vec<usize> {
        self.connected_slots().map(|(i, _)| i).collect()
    }
}
