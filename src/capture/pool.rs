//! Fixed pool of capture images
//!
//! Units built from a pool slot are externally managed: the queue unlinks
//! them but the slot stays owned here until the unit is reclaimed.

use crate::packet::MediaUnit;
use crate::queue::UnitReclaimer;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{trace, warn};

pub struct ImagePool {
    // Some(image) while a unit references the slot
    slots: Mutex<Vec<Option<Bytes>>>,
}

impl ImagePool {
    /// Creates a pool with `capacity` image slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    /// Stores `image` in a free slot and returns its index, or None when
    /// every slot is still referenced
    pub fn acquire(&self, image: Bytes) -> Option<usize> {
        let mut slots = self.slots.lock();
        let index = slots.iter().position(Option::is_none)?;
        slots[index] = Some(image);
        trace!(index, "Image slot acquired");
        Some(index)
    }

    /// Frees a slot
    pub fn release(&self, index: usize) {
        let mut slots = self.slots.lock();
        match slots.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                trace!(index, "Image slot released");
            }
            Some(_) => warn!(index, "Image slot released twice"),
            None => warn!(index, "Image slot out of range"),
        }
    }

    /// Image held in a slot
    pub fn image(&self, index: usize) -> Option<Bytes> {
        self.slots.lock().get(index).cloned().flatten()
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Slots currently referenced by a unit
    pub fn in_use(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }
}

impl UnitReclaimer for ImagePool {
    fn reclaim(&self, unit: MediaUnit) {
        if let Some(index) = unit.ownership.image_index() {
            self.release(index);
        }
    }
}
