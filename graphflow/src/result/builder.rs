// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Request-scoped result builder
//!
//! Resolver tasks complete concurrently and populate sibling nodes at the
//! same time, so every rent and write goes through one lock per request.

use super::node::{NodeKind, NodeRef, ParentRef, ResultValue};
use super::owner::{ResultMemoryOwner, ResultPool};
use super::ResultError;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug)]
struct BuilderState {
    owner: Option<ResultMemoryOwner>,
    root: Option<NodeRef>,
}

/// Mutable response tree for one request
#[derive(Debug)]
pub struct ResultBuilder {
    state: Mutex<BuilderState>,
}

impl ResultBuilder {
    pub fn new(pool: Arc<ResultPool>) -> Self {
        Self {
            state: Mutex::new(BuilderState {
                owner: Some(ResultMemoryOwner::new(pool)),
                root: None,
            }),
        }
    }

    fn with_owner<R>(
        &self,
        f: impl FnOnce(&mut ResultMemoryOwner) -> Result<R, ResultError>,
    ) -> Result<R, ResultError> {
        let mut state = self.state.lock();
        let owner = state.owner.as_mut().ok_or(ResultError::Sealed)?;
        f(owner)
    }

    /// Rent a cleared object node with room for `capacity` fields
    pub fn rent_map(
        &self,
        capacity: usize,
        parent: Option<ParentRef>,
        nullable: bool,
    ) -> Result<NodeRef, ResultError> {
        self.with_owner(|owner| Ok(owner.rent(NodeKind::Map, capacity, parent, nullable)))
    }

    /// Rent a cleared leaf list with `capacity` items
    pub fn rent_list(
        &self,
        capacity: usize,
        parent: Option<ParentRef>,
        nullable: bool,
    ) -> Result<NodeRef, ResultError> {
        self.with_owner(|owner| Ok(owner.rent(NodeKind::List, capacity, parent, nullable)))
    }

    /// Rent a cleared list of objects with `capacity` items
    pub fn rent_map_list(
        &self,
        capacity: usize,
        parent: Option<ParentRef>,
        nullable: bool,
    ) -> Result<NodeRef, ResultError> {
        self.with_owner(|owner| Ok(owner.rent(NodeKind::MapList, capacity, parent, nullable)))
    }

    pub fn set_root(&self, node: NodeRef) {
        self.state.lock().root = Some(node);
    }

    pub fn root(&self) -> Option<NodeRef> {
        self.state.lock().root
    }

    /// Write a value into a map field or a list item
    pub fn set_value(
        &self,
        target: ParentRef,
        name: &Arc<str>,
        value: ResultValue,
    ) -> Result<(), ResultError> {
        self.with_owner(|owner| write_value(owner, target, name, value))
    }

    /// Null the value at `target`; a non-nullable position nulls its parent
    /// node instead, repeating until a nullable position or the root is hit
    pub fn set_null(
        &self,
        target: ParentRef,
        name: &Arc<str>,
        nullable: bool,
    ) -> Result<(), ResultError> {
        self.with_owner(|owner| {
            write_value(owner, target, name, ResultValue::Null)?;
            if nullable {
                return Ok(());
            }

            let mut node = target.node;
            loop {
                owner.invalidate(node)?;
                let (parent, node_nullable) = owner.link(node)?;
                match parent {
                    Some(parent) => {
                        owner.set_null_at(parent)?;
                        if node_nullable {
                            break;
                        }
                        node = parent.node;
                    }
                    None => break,
                }
            }
            Ok(())
        })
    }

    pub fn is_invalidated(&self, node: NodeRef) -> Result<bool, ResultError> {
        self.with_owner(|owner| owner.is_invalidated(node))
    }

    /// Materialise the subtree rooted at `node`
    pub fn to_json(&self, node: NodeRef) -> Result<Value, ResultError> {
        self.with_owner(|owner| node_to_json(owner, node))
    }

    /// Buffer groups held by the current owner
    pub fn buffer_groups(&self) -> usize {
        self.state
            .lock()
            .owner
            .as_ref()
            .map(ResultMemoryOwner::buffer_groups)
            .unwrap_or(0)
    }

    /// Detach the memory owner; later writes fail with `ResultError::Sealed`
    pub fn seal(&self) -> Option<ResultMemoryOwner> {
        let mut state = self.state.lock();
        state.root = None;
        state.owner.take()
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().owner.is_none()
    }
}

fn write_value(
    owner: &mut ResultMemoryOwner,
    target: ParentRef,
    name: &Arc<str>,
    value: ResultValue,
) -> Result<(), ResultError> {
    match target.node.kind {
        NodeKind::Map => {
            if owner.map_mut(target.node)?.set(target.slot, name.clone(), value) {
                Ok(())
            } else {
                Err(ResultError::SlotOutOfRange(target.slot))
            }
        }
        NodeKind::List => {
            let list = owner.list_mut(target.node)?;
            let item = list
                .items
                .get_mut(target.slot)
                .ok_or(ResultError::SlotOutOfRange(target.slot))?;
            *item = value;
            Ok(())
        }
        NodeKind::MapList => {
            let item = match value {
                ResultValue::Null => None,
                ResultValue::Node(node) if node.kind == NodeKind::Map => Some(node),
                ResultValue::Node(node) => {
                    return Err(ResultError::KindMismatch {
                        expected: NodeKind::Map,
                        actual: node.kind,
                    })
                }
                ResultValue::Leaf(_) => {
                    return Err(ResultError::KindMismatch {
                        expected: NodeKind::Map,
                        actual: NodeKind::List,
                    })
                }
            };
            let list = owner.map_list_mut(target.node)?;
            let slot = list
                .items
                .get_mut(target.slot)
                .ok_or(ResultError::SlotOutOfRange(target.slot))?;
            *slot = item;
            Ok(())
        }
    }
}

fn value_to_json(owner: &ResultMemoryOwner, value: &ResultValue) -> Result<Value, ResultError> {
    match value {
        ResultValue::Null => Ok(Value::Null),
        ResultValue::Leaf(leaf) => Ok(leaf.clone()),
        ResultValue::Node(node) => node_to_json(owner, *node),
    }
}

fn node_to_json(owner: &ResultMemoryOwner, node: NodeRef) -> Result<Value, ResultError> {
    if owner.is_invalidated(node)? {
        return Ok(Value::Null);
    }
    match node.kind {
        NodeKind::Map => {
            let map = owner.map(node)?;
            let mut object = Map::with_capacity(map.len());
            for field in map.fields() {
                // Unset slots are deferred or skipped fields
                let (true, Some(name)) = (field.is_set, field.name.as_ref()) else {
                    continue;
                };
                object.insert(name.to_string(), value_to_json(owner, &field.value)?);
            }
            Ok(Value::Object(object))
        }
        NodeKind::List => {
            let list = owner.list(node)?;
            let items = list
                .items()
                .iter()
                .map(|item| value_to_json(owner, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
        NodeKind::MapList => {
            let list = owner.map_list(node)?;
            let items = list
                .items()
                .iter()
                .map(|item| match item {
                    Some(child) => node_to_json(owner, *child),
                    None => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
    }
}
