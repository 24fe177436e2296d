// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Compiled operation plans consumed by the execution core

pub mod selection;

pub use selection::{
    DeferredFragment, ExecutionStrategy, FieldType, LeafType, Selection, SelectionSet,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Root operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// A compiled operation ready for execution
#[derive(Debug, Clone)]
pub struct Operation {
    name: Option<String>,
    kind: OperationKind,
    selection_set: Arc<SelectionSet>,
}

impl Operation {
    pub fn query(selection_set: SelectionSet) -> Self {
        Self::new(OperationKind::Query, selection_set)
    }

    pub fn mutation(selection_set: SelectionSet) -> Self {
        Self::new(OperationKind::Mutation, selection_set)
    }

    pub fn new(kind: OperationKind, selection_set: SelectionSet) -> Self {
        Self {
            name: None,
            kind,
            selection_set: Arc::new(selection_set),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn selection_set(&self) -> &Arc<SelectionSet> {
        &self.selection_set
    }
}
