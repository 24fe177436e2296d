// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Task model

use crate::batch::BatchKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a scheduled task, unique within a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(id: u64) -> Self {
        TaskId(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{}", self.0)
    }
}

/// How a task is run once it is popped from a lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionKind {
    /// Spawned onto the runtime, the drive loop does not wait for it
    #[default]
    Default,
    /// Cheap and side-effect free, run directly on the drive loop
    Pure,
    /// Continuation work run directly on the drive loop
    Inline,
    /// Serial lane, never overlapping other serial work
    Serial,
}

/// Condition that must hold before a task becomes runnable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Another task of the same request has completed
    Task(TaskId),
    /// The batched value for a key has been fetched
    Batch(BatchKey),
}

/// A schedulable unit of resolution
///
/// The scheduler reports completion on the task's behalf after `execute`
/// returns, so a task never calls `WorkScheduler::complete` itself.
/// Field-level failures are recorded by the task; `execute` has no error
/// channel back to the scheduler.
#[async_trait]
pub trait ExecutionTask: Send + Sync + fmt::Debug {
    fn id(&self) -> TaskId;

    fn parent_id(&self) -> Option<TaskId> {
        None
    }

    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Default
    }

    fn is_serial(&self) -> bool {
        self.kind() == ExecutionKind::Serial
    }

    /// Document position used to order the serial lane
    fn ordinal(&self) -> usize {
        0
    }

    fn dependency(&self) -> Option<Dependency> {
        None
    }

    async fn execute(&self);
}

pub type TaskRef = Arc<dyn ExecutionTask>;
