// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared result pool and the per-request memory owner
//!
//! Every buffer rented while executing one request belongs to exactly one
//! `ResultMemoryOwner`. Buffers go back to the shared `ResultPool` only when
//! that owner is disposed, and always all at once.

use super::buffer::ResultBuffer;
use super::node::{NodeKind, NodeRef, ParentRef, ResultList, ResultMap, ResultMapList, ResultNode};
use super::pool::ObjectPool;
use super::ResultError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Buffer pools shared by all requests of an executor
#[derive(Debug)]
pub struct ResultPool {
    maps: ObjectPool<ResultBuffer<ResultMap>>,
    lists: ObjectPool<ResultBuffer<ResultList>>,
    map_lists: ObjectPool<ResultBuffer<ResultMapList>>,
    buffer_capacity: usize,
}

impl ResultPool {
    /// Create a pool whose buffer groups hold `buffer_capacity` nodes each and
    /// which keeps at most `max_pooled` idle groups per node kind
    pub fn new(buffer_capacity: usize, max_pooled: usize) -> Self {
        Self {
            maps: ObjectPool::new(max_pooled, move || ResultBuffer::new(buffer_capacity)),
            lists: ObjectPool::new(max_pooled, move || ResultBuffer::new(buffer_capacity)),
            map_lists: ObjectPool::new(max_pooled, move || ResultBuffer::new(buffer_capacity)),
            buffer_capacity,
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Idle buffer groups per kind: (maps, lists, map lists)
    pub fn pooled(&self) -> (usize, usize, usize) {
        (
            self.maps.pooled(),
            self.lists.pooled(),
            self.map_lists.pooled(),
        )
    }
}

impl Default for ResultPool {
    fn default() -> Self {
        Self::new(64, 128)
    }
}

fn rent_slot<T: ResultNode>(
    buffers: &mut Vec<ResultBuffer<T>>,
    pool: &ObjectPool<ResultBuffer<T>>,
) -> (u32, u32) {
    loop {
        let index = buffers.len().saturating_sub(1);
        if let Some(buffer) = buffers.last_mut() {
            if let Some(slot) = buffer.try_rent() {
                return (index as u32, slot as u32);
            }
        }
        buffers.push(pool.acquire());
    }
}

fn slot<T: ResultNode>(buffers: &[ResultBuffer<T>], node: NodeRef) -> Result<&T, ResultError> {
    buffers
        .get(node.buffer as usize)
        .and_then(|buffer| buffer.get(node.slot as usize))
        .ok_or(ResultError::StaleReference)
}

fn slot_mut<T: ResultNode>(
    buffers: &mut [ResultBuffer<T>],
    node: NodeRef,
) -> Result<&mut T, ResultError> {
    buffers
        .get_mut(node.buffer as usize)
        .and_then(|buffer| buffer.get_mut(node.slot as usize))
        .ok_or(ResultError::StaleReference)
}

/// Exclusive owner of all result buffers rented during one request
pub struct ResultMemoryOwner {
    generation: u64,
    pool: Arc<ResultPool>,
    maps: Vec<ResultBuffer<ResultMap>>,
    lists: Vec<ResultBuffer<ResultList>>,
    map_lists: Vec<ResultBuffer<ResultMapList>>,
}

impl std::fmt::Debug for ResultMemoryOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultMemoryOwner")
            .field("generation", &self.generation)
            .field("maps", &self.maps.len())
            .field("lists", &self.lists.len())
            .field("map_lists", &self.map_lists.len())
            .finish()
    }
}

impl ResultMemoryOwner {
    pub fn new(pool: Arc<ResultPool>) -> Self {
        Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            pool,
            maps: Vec::new(),
            lists: Vec::new(),
            map_lists: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of buffer groups currently held
    pub fn buffer_groups(&self) -> usize {
        self.maps.len() + self.lists.len() + self.map_lists.len()
    }

    pub fn rent(
        &mut self,
        kind: NodeKind,
        capacity: usize,
        parent: Option<ParentRef>,
        nullable: bool,
    ) -> NodeRef {
        let (buffer, slot) = match kind {
            NodeKind::Map => rent_slot(&mut self.maps, &self.pool.maps),
            NodeKind::List => rent_slot(&mut self.lists, &self.pool.lists),
            NodeKind::MapList => rent_slot(&mut self.map_lists, &self.pool.map_lists),
        };
        let node = NodeRef {
            kind,
            buffer,
            slot,
            generation: self.generation,
        };

        // A freshly rented slot always exists, the lookups below cannot miss
        match kind {
            NodeKind::Map => {
                if let Ok(map) = slot_mut(&mut self.maps, node) {
                    map.init(capacity, parent, nullable);
                }
            }
            NodeKind::List => {
                if let Ok(list) = slot_mut(&mut self.lists, node) {
                    list.init(capacity, parent, nullable);
                }
            }
            NodeKind::MapList => {
                if let Ok(list) = slot_mut(&mut self.map_lists, node) {
                    list.init(capacity, parent, nullable);
                }
            }
        }
        node
    }

    fn check(&self, node: NodeRef, kind: NodeKind) -> Result<(), ResultError> {
        if node.generation != self.generation {
            return Err(ResultError::StaleReference);
        }
        if node.kind != kind {
            return Err(ResultError::KindMismatch {
                expected: kind,
                actual: node.kind,
            });
        }
        Ok(())
    }

    pub fn map(&self, node: NodeRef) -> Result<&ResultMap, ResultError> {
        self.check(node, NodeKind::Map)?;
        slot(&self.maps, node)
    }

    pub fn map_mut(&mut self, node: NodeRef) -> Result<&mut ResultMap, ResultError> {
        self.check(node, NodeKind::Map)?;
        slot_mut(&mut self.maps, node)
    }

    pub fn list(&self, node: NodeRef) -> Result<&ResultList, ResultError> {
        self.check(node, NodeKind::List)?;
        slot(&self.lists, node)
    }

    pub fn list_mut(&mut self, node: NodeRef) -> Result<&mut ResultList, ResultError> {
        self.check(node, NodeKind::List)?;
        slot_mut(&mut self.lists, node)
    }

    pub fn map_list(&self, node: NodeRef) -> Result<&ResultMapList, ResultError> {
        self.check(node, NodeKind::MapList)?;
        slot(&self.map_lists, node)
    }

    pub fn map_list_mut(&mut self, node: NodeRef) -> Result<&mut ResultMapList, ResultError> {
        self.check(node, NodeKind::MapList)?;
        slot_mut(&mut self.map_lists, node)
    }

    /// Parent link and nullability of any node
    pub fn link(&self, node: NodeRef) -> Result<(Option<ParentRef>, bool), ResultError> {
        Ok(match node.kind {
            NodeKind::Map => {
                let map = self.map(node)?;
                (map.parent(), map.is_nullable())
            }
            NodeKind::List => {
                let list = self.list(node)?;
                (list.parent(), list.is_nullable())
            }
            NodeKind::MapList => {
                let list = self.map_list(node)?;
                (list.parent(), list.is_nullable())
            }
        })
    }

    pub fn is_invalidated(&self, node: NodeRef) -> Result<bool, ResultError> {
        Ok(match node.kind {
            NodeKind::Map => self.map(node)?.is_invalidated(),
            NodeKind::List => self.list(node)?.is_invalidated(),
            NodeKind::MapList => self.map_list(node)?.is_invalidated(),
        })
    }

    pub fn invalidate(&mut self, node: NodeRef) -> Result<(), ResultError> {
        match node.kind {
            NodeKind::Map => self.map_mut(node)?.invalidate(),
            NodeKind::List => self.list_mut(node)?.invalidate(),
            NodeKind::MapList => self.map_list_mut(node)?.invalidate(),
        }
        Ok(())
    }

    pub fn set_null_at(&mut self, target: ParentRef) -> Result<(), ResultError> {
        let written = match target.node.kind {
            NodeKind::Map => self.map_mut(target.node)?.set_null_at(target.slot),
            NodeKind::List => self.list_mut(target.node)?.set_null_at(target.slot),
            NodeKind::MapList => self.map_list_mut(target.node)?.set_null_at(target.slot),
        };
        if written {
            Ok(())
        } else {
            Err(ResultError::SlotOutOfRange(target.slot))
        }
    }

    /// Return every buffer group to the shared pool in one step
    pub fn dispose(self) {
        log::trace!(
            "Disposing result memory owner {} with {} buffer groups",
            self.generation,
            self.buffer_groups()
        );
        drop(self);
    }
}

impl Drop for ResultMemoryOwner {
    fn drop(&mut self) {
        for buffer in self.maps.drain(..) {
            self.pool.maps.release(buffer);
        }
        for buffer in self.lists.drain(..) {
            self.pool.lists.release(buffer);
        }
        for buffer in self.map_lists.drain(..) {
            self.pool.map_lists.release(buffer);
        }
    }
}
