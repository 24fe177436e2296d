// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Pooled buffer groups holding result nodes

use super::node::ResultNode;
use super::pool::Poolable;

/// Fixed-capacity group of result nodes rented slot by slot
///
/// Slots are handed out in order and never individually given back; the
/// whole group is reset when the owning request releases it.
#[derive(Debug)]
pub struct ResultBuffer<T> {
    slots: Vec<T>,
    used: usize,
}

impl<T: ResultNode> ResultBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| T::default()).collect(),
            used: 0,
        }
    }

    /// Claim the next free slot, if any
    pub fn try_rent(&mut self) -> Option<usize> {
        if self.used < self.slots.len() {
            let slot = self.used;
            self.used += 1;
            Some(slot)
        } else {
            None
        }
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        if slot < self.used {
            self.slots.get(slot)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        if slot < self.used {
            self.slots.get_mut(slot)
        } else {
            None
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.used == self.slots.len()
    }
}

impl<T: ResultNode> Poolable for ResultBuffer<T> {
    fn reset(&mut self) {
        for slot in &mut self.slots[..self.used] {
            slot.clear();
        }
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::node::{ResultMap, ResultValue};
    use std::sync::Arc;

    #[test]
    fn test_rent_until_full() {
        let mut buffer: ResultBuffer<ResultMap> = ResultBuffer::new(2);

        assert_eq!(buffer.try_rent(), Some(0));
        assert_eq!(buffer.try_rent(), Some(1));
        assert_eq!(buffer.try_rent(), None);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_reset_matches_fresh_buffer() {
        let mut buffer: ResultBuffer<ResultMap> = ResultBuffer::new(4);
        let slot = buffer.try_rent().unwrap();
        {
            let map = buffer.get_mut(slot).unwrap();
            map.init(3, None, true);
            map.set(0, Arc::from("name"), ResultValue::Leaf(serde_json::json!("Ada")));
            map.set(2, Arc::from("age"), ResultValue::Leaf(serde_json::json!(36)));
            map.invalidate();
        }

        buffer.reset();

        let fresh: ResultBuffer<ResultMap> = ResultBuffer::new(4);
        assert_eq!(buffer.used(), fresh.used());
        assert!(buffer.get(0).is_none());

        // Renting again hands back a cleared node with nothing from before
        let slot = buffer.try_rent().unwrap();
        let map = buffer.get(slot).unwrap();
        assert!(map.is_empty());
        assert!(map.parent().is_none());
        assert!(!map.is_invalidated());
        assert!(!map.is_nullable());
    }
}
