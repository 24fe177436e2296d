// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Generic object pool for request-scoped resources
//!
//! Pooled values are handed out by `acquire()` and handed back by value with
//! `release()`, which resets them before they become visible to the next
//! caller. A released value is moved into the pool, so a caller cannot keep
//! using it after release.

use parking_lot::Mutex;
use std::fmt;

/// A value that can be cleared and reused by a later request
pub trait Poolable: Send {
    /// Erase all state left behind by the previous user
    fn reset(&mut self);
}

/// Bounded pool of reusable values
pub struct ObjectPool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity)
            .field("pooled", &self.items.lock().len())
            .finish()
    }
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool that keeps at most `capacity` idle values
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            factory: Box::new(factory),
        }
    }

    /// Take an idle value or create a fresh one
    pub fn acquire(&self) -> T {
        let pooled = self.items.lock().pop();
        pooled.unwrap_or_else(|| (self.factory)())
    }

    /// Reset a value and keep it for reuse; values beyond capacity are dropped
    pub fn release(&self, mut item: T) {
        item.reset();
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push(item);
        }
    }

    /// Number of idle values currently held
    pub fn pooled(&self) -> usize {
        self.items.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
