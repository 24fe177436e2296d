// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Result tree nodes
//!
//! Nodes never own their children or their parent. Children are referenced by
//! `NodeRef` handles into the request's buffers, and the parent link is a
//! back-reference used only for null propagation.

use serde_json::Value;
use std::sync::Arc;

/// The three buffer kinds making up a response tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Object with named fields
    Map,
    /// List of leaf values
    List,
    /// List of objects
    MapList,
}

/// Generation-checked handle to a node rented from a memory owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub(crate) kind: NodeKind,
    pub(crate) buffer: u32,
    pub(crate) slot: u32,
    pub(crate) generation: u64,
}

impl NodeRef {
    pub fn kind(&self) -> NodeKind {
        self.kind
    }
}

/// Position of a value inside its parent node (field slot or list index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub node: NodeRef,
    pub slot: usize,
}

impl ParentRef {
    pub fn new(node: NodeRef, slot: usize) -> Self {
        Self { node, slot }
    }
}

/// Value stored in a field slot or list item
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResultValue {
    #[default]
    Null,
    Leaf(Value),
    Node(NodeRef),
}

/// A node that lives in a pooled buffer
pub trait ResultNode: Default + Send {
    /// Prepare a cleared node for `capacity` entries
    fn init(&mut self, capacity: usize, parent: Option<ParentRef>, nullable: bool);

    /// Erase every entry and link so the node equals a freshly constructed one
    fn clear(&mut self);

    fn parent(&self) -> Option<ParentRef>;

    fn is_nullable(&self) -> bool;

    fn is_invalidated(&self) -> bool;

    fn invalidate(&mut self);

    /// Overwrite the entry at `slot` with null
    fn set_null_at(&mut self, slot: usize) -> bool;
}

/// One field of a result map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultField {
    pub name: Option<Arc<str>>,
    pub value: ResultValue,
    pub is_set: bool,
}

/// Object node; fields keep selection order
#[derive(Debug, Default)]
pub struct ResultMap {
    pub(crate) fields: Vec<ResultField>,
    parent: Option<ParentRef>,
    nullable: bool,
    invalidated: bool,
}

impl ResultMap {
    pub fn fields(&self) -> &[ResultField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn set(&mut self, slot: usize, name: Arc<str>, value: ResultValue) -> bool {
        match self.fields.get_mut(slot) {
            Some(field) => {
                field.name = Some(name);
                field.value = value;
                field.is_set = true;
                true
            }
            None => false,
        }
    }
}

impl ResultNode for ResultMap {
    fn init(&mut self, capacity: usize, parent: Option<ParentRef>, nullable: bool) {
        self.fields.resize_with(capacity, ResultField::default);
        self.parent = parent;
        self.nullable = nullable;
        self.invalidated = false;
    }

    fn clear(&mut self) {
        self.fields.clear();
        self.parent = None;
        self.nullable = false;
        self.invalidated = false;
    }

    fn parent(&self) -> Option<ParentRef> {
        self.parent
    }

    fn is_nullable(&self) -> bool {
        self.nullable
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    fn invalidate(&mut self) {
        self.invalidated = true;
    }

    fn set_null_at(&mut self, slot: usize) -> bool {
        match self.fields.get_mut(slot) {
            Some(field) => {
                field.value = ResultValue::Null;
                field.is_set = true;
                true
            }
            None => false,
        }
    }
}

/// List of leaf values
#[derive(Debug, Default)]
pub struct ResultList {
    pub(crate) items: Vec<ResultValue>,
    parent: Option<ParentRef>,
    nullable: bool,
    invalidated: bool,
}

impl ResultList {
    pub fn items(&self) -> &[ResultValue] {
        &self.items
    }
}

impl ResultNode for ResultList {
    fn init(&mut self, capacity: usize, parent: Option<ParentRef>, nullable: bool) {
        self.items.resize_with(capacity, ResultValue::default);
        self.parent = parent;
        self.nullable = nullable;
        self.invalidated = false;
    }

    fn clear(&mut self) {
        self.items.clear();
        self.parent = None;
        self.nullable = false;
        self.invalidated = false;
    }

    fn parent(&self) -> Option<ParentRef> {
        self.parent
    }

    fn is_nullable(&self) -> bool {
        self.nullable
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    fn invalidate(&mut self) {
        self.invalidated = true;
    }

    fn set_null_at(&mut self, slot: usize) -> bool {
        match self.items.get_mut(slot) {
            Some(item) => {
                *item = ResultValue::Null;
                true
            }
            None => false,
        }
    }
}

/// List whose items are result maps
#[derive(Debug, Default)]
pub struct ResultMapList {
    pub(crate) items: Vec<Option<NodeRef>>,
    parent: Option<ParentRef>,
    nullable: bool,
    invalidated: bool,
}

impl ResultMapList {
    pub fn items(&self) -> &[Option<NodeRef>] {
        &self.items
    }
}

impl ResultNode for ResultMapList {
    fn init(&mut self, capacity: usize, parent: Option<ParentRef>, nullable: bool) {
        self.items.resize(capacity, None);
        self.parent = parent;
        self.nullable = nullable;
        self.invalidated = false;
    }

    fn clear(&mut self) {
        self.items.clear();
        self.parent = None;
        self.nullable = false;
        self.invalidated = false;
    }

    fn parent(&self) -> Option<ParentRef> {
        self.parent
    }

    fn is_nullable(&self) -> bool {
        self.nullable
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    fn invalidate(&mut self) {
        self.invalidated = true;
    }

    fn set_null_at(&mut self, slot: usize) -> bool {
        match self.items.get_mut(slot) {
            Some(item) => {
                *item = None;
                true
            }
            None => false,
        }
    }
}
