// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Resolver tasks scheduled by the executors

use super::completion::{complete_value, null_field, resolve_and_complete, FieldTarget};
use super::context::ExecutionPhase;
use super::error::ExecutionError;
use crate::batch::BatchKey;
use crate::plan::{ExecutionStrategy, Selection};
use crate::scheduler::{Dependency, ExecutionKind, ExecutionTask, TaskId};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Resolves one selection against its parent value and completes the result
#[derive(Debug)]
pub(crate) struct ResolverTask {
    id: TaskId,
    parent_id: Option<TaskId>,
    kind: ExecutionKind,
    ordinal: usize,
    phase: Arc<ExecutionPhase>,
    selection: Selection,
    parent: Arc<Value>,
    target: FieldTarget,
}

impl ResolverTask {
    pub fn new(
        phase: &Arc<ExecutionPhase>,
        parent_id: Option<TaskId>,
        selection: Selection,
        parent: Arc<Value>,
        target: FieldTarget,
        ordinal: usize,
        serial: bool,
    ) -> Self {
        let kind = match selection.strategy() {
            _ if serial => ExecutionKind::Serial,
            ExecutionStrategy::Serial => ExecutionKind::Serial,
            ExecutionStrategy::Pure => ExecutionKind::Pure,
            ExecutionStrategy::Default => ExecutionKind::Default,
        };
        Self {
            id: phase.request().next_task_id(),
            parent_id,
            kind,
            ordinal,
            phase: phase.clone(),
            selection,
            parent,
            target,
        }
    }
}

#[async_trait]
impl ExecutionTask for ResolverTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn parent_id(&self) -> Option<TaskId> {
        self.parent_id
    }

    fn kind(&self) -> ExecutionKind {
        self.kind
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    async fn execute(&self) {
        let outcome = resolve_and_complete(
            &self.phase,
            self.id,
            &self.selection,
            &self.parent,
            &self.target,
        )
        .await;
        if let Err(error) = outcome {
            self.phase.fail(error);
        }
    }
}

/// Completes a field once the batched value it asked for has been fetched
#[derive(Debug)]
pub(crate) struct LoadedValueTask {
    id: TaskId,
    parent_id: TaskId,
    phase: Arc<ExecutionPhase>,
    selection: Selection,
    key: BatchKey,
    target: FieldTarget,
}

impl LoadedValueTask {
    pub fn new(
        phase: &Arc<ExecutionPhase>,
        parent_id: TaskId,
        selection: Selection,
        key: BatchKey,
        target: FieldTarget,
    ) -> Self {
        Self {
            id: phase.request().next_task_id(),
            parent_id,
            phase: phase.clone(),
            selection,
            key,
            target,
        }
    }

    async fn complete(&self) -> Result<(), ExecutionError> {
        match self.phase.batch().value(&self.key) {
            Some(Ok(value)) => {
                complete_value(&self.phase, self.id, &self.selection, value, &self.target).await
            }
            Some(Err(error)) => {
                self.phase.report(self.id, error, &self.target.path);
                null_field(&self.phase, &self.target)
            }
            None => Err(ExecutionError::InvariantViolation(format!(
                "{} admitted before {} was fetched",
                self.id, self.key
            ))),
        }
    }
}

#[async_trait]
impl ExecutionTask for LoadedValueTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn parent_id(&self) -> Option<TaskId> {
        Some(self.parent_id)
    }

    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Inline
    }

    fn dependency(&self) -> Option<Dependency> {
        Some(Dependency::Batch(self.key.clone()))
    }

    async fn execute(&self) {
        if let Err(error) = self.complete().await {
            self.phase.fail(error);
        }
    }
}
