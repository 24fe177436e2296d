// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Backlog of deferred units waiting for the primary response

use super::{DeferredExecutionTask, DeferredTaskId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// One registered deferred unit
#[derive(Clone)]
pub struct DeferredEntry {
    pub id: DeferredTaskId,
    pub parent: DeferredTaskId,
    pub task: Arc<dyn DeferredExecutionTask>,
}

impl fmt::Debug for DeferredEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredEntry")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("label", &self.task.label())
            .finish()
    }
}

/// Registration order is kept only as a tie-break for taking work
#[derive(Debug, Default)]
pub struct DeferredWorkBacklog {
    entries: VecDeque<DeferredEntry>,
}

impl DeferredWorkBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: DeferredEntry) {
        self.entries.push_back(entry);
    }

    pub fn try_take(&mut self) -> Option<DeferredEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
