// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Field resolution and value completion
//!
//! Completing a value writes it into the result tree. Leaves are coerced to
//! their leaf type; composite values rent a node and produce one child task
//! per selection. Failures stay local to the field: the error is recorded at
//! the field path and the field is nulled.

use super::context::ExecutionPhase;
use super::deferred::DeferredFragmentTask;
use super::error::{ExecutionError, FieldError};
use super::resolver::{default_resolve, Resolved};
use super::task::{LoadedValueTask, ResolverTask};
use crate::batch::BatchKey;
use crate::plan::{FieldType, Selection, SelectionSet};
use crate::result::{NodeRef, ParentRef, ResponsePath, ResultValue};
use crate::scheduler::{TaskId, TaskRef};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;

/// Where a completed value is written
#[derive(Debug, Clone)]
pub(crate) struct FieldTarget {
    pub slot: ParentRef,
    pub name: Arc<str>,
    pub nullable: bool,
    pub path: ResponsePath,
}

/// Seed a phase with the selections of `set` written into `map`, then drive it
pub(crate) async fn execute_selection_set(
    phase: &Arc<ExecutionPhase>,
    map: NodeRef,
    set: &Arc<SelectionSet>,
    value: &Arc<Value>,
    path: &ResponsePath,
    serial: bool,
) -> Result<(), ExecutionError> {
    match populate_object(phase, None, map, set, value, path, serial).await {
        Ok(tasks) => phase.run(tasks).await,
        Err(error) => {
            phase.release();
            Err(error)
        }
    }
}

/// Fill the fields of a rented map
///
/// Inlinable fields are resolved on the spot; the others become tasks that
/// the caller registers in selection order. Deferred fragments of `set` go
/// to the request's deferred scheduler.
pub(crate) fn populate_object<'a>(
    phase: &'a Arc<ExecutionPhase>,
    parent_task: Option<TaskId>,
    map: NodeRef,
    set: &'a Arc<SelectionSet>,
    value: &'a Arc<Value>,
    path: &'a ResponsePath,
    serial: bool,
) -> BoxFuture<'a, Result<Vec<TaskRef>, ExecutionError>> {
    async move {
        let selections = set.selections_for(value);
        let mut tasks: Vec<TaskRef> = Vec::with_capacity(selections.len());

        for (index, selection) in selections.iter().enumerate() {
            let target = FieldTarget {
                slot: ParentRef::new(map, index),
                name: selection.response_name().clone(),
                nullable: selection.is_nullable(),
                path: path.with_field(selection.response_name()),
            };
            if !serial && phase.scheduler().can_be_inlined(selection) {
                let id = phase.request().next_task_id();
                resolve_and_complete(phase, id, selection, value, &target).await?;
            } else {
                tasks.push(Arc::new(ResolverTask::new(
                    phase,
                    parent_task,
                    selection.clone(),
                    value.clone(),
                    target,
                    index,
                    serial,
                )));
            }
        }

        for fragment in set.deferred() {
            let task = DeferredFragmentTask::new(
                phase.request(),
                fragment.clone(),
                value.clone(),
                path.clone(),
            );
            phase
                .request()
                .deferred()
                .register(Arc::new(task), phase.deferred_parent());
        }
        Ok(tasks)
    }
    .boxed()
}

async fn resolve_field(
    phase: &ExecutionPhase,
    selection: &Selection,
    parent: &Value,
    path: &ResponsePath,
) -> Option<Result<Resolved, FieldError>> {
    let Some(resolver) = selection.resolver() else {
        return Some(Ok(Resolved::Value(default_resolve(selection, parent))));
    };
    let cancel = phase.cancellation();
    let ctx = phase.request().field_context(selection, parent, path, cancel);
    tokio::select! {
        resolved = resolver.resolve(&ctx) => Some(resolved),
        _ = cancel.cancelled() => None,
    }
}

/// Resolve one field and complete its value; cancelled fields are left unset
pub(crate) async fn resolve_and_complete(
    phase: &Arc<ExecutionPhase>,
    task: TaskId,
    selection: &Selection,
    parent: &Arc<Value>,
    target: &FieldTarget,
) -> Result<(), ExecutionError> {
    match resolve_field(phase, selection, parent, &target.path).await {
        None => Ok(()),
        Some(Ok(Resolved::Value(value))) => complete_value(phase, task, selection, value, target).await,
        Some(Ok(Resolved::Load(key))) => load(phase, task, selection, key, target).await,
        Some(Err(error)) => {
            phase.report(task, error, &target.path);
            null_field(phase, target)
        }
    }
}

async fn load(
    phase: &Arc<ExecutionPhase>,
    task: TaskId,
    selection: &Selection,
    key: BatchKey,
    target: &FieldTarget,
) -> Result<(), ExecutionError> {
    if phase.scheduler().dispatcher().is_batching() {
        if let Err(error) = phase.batch().enqueue(&key) {
            phase.report(task, error, &target.path);
            return null_field(phase, target);
        }
        let continuation =
            LoadedValueTask::new(phase, task, selection.clone(), key, target.clone());
        return phase.scheduler().register(Arc::new(continuation));
    }

    let cancel = phase.cancellation();
    let loaded = tokio::select! {
        loaded = phase.batch().load_now(&key) => loaded,
        _ = cancel.cancelled() => return Ok(()),
    };
    match loaded {
        Ok(value) => complete_value(phase, task, selection, value, target).await,
        Err(error) => {
            phase.report(task, error, &target.path);
            null_field(phase, target)
        }
    }
}

/// Write a resolved value into the result tree
pub(crate) async fn complete_value(
    phase: &Arc<ExecutionPhase>,
    task: TaskId,
    selection: &Selection,
    value: Value,
    target: &FieldTarget,
) -> Result<(), ExecutionError> {
    let set = match (selection.field_type(), selection.selection_set()) {
        (FieldType::Leaf(_) | FieldType::LeafList(_), _) => {
            return complete_scalar(phase, task, selection, value, target)
        }
        (_, Some(set)) => set,
        (_, None) => {
            return field_failure(
                phase,
                task,
                target,
                format!("Field '{}' has no selections", selection.field_name()),
            )
        }
    };

    let tasks = match (selection.field_type(), value) {
        (_, Value::Null) => return null_value(phase, task, target),
        (FieldType::ObjectList, Value::Array(items)) => {
            let results = phase.request().results();
            let list = results.rent_map_list(items.len(), Some(target.slot), target.nullable)?;
            results.set_value(target.slot, &target.name, ResultValue::Node(list))?;

            let mut tasks = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                let item_target = FieldTarget {
                    slot: ParentRef::new(list, index),
                    name: target.name.clone(),
                    nullable: true,
                    path: target.path.with_index(index),
                };
                tasks.extend(complete_object(phase, task, set, item, &item_target).await?);
            }
            tasks
        }
        (FieldType::ObjectList, other) => {
            return field_failure(phase, task, target, format!("Expected a list, found {}", other))
        }
        (_, value) => complete_object(phase, task, set, value, target).await?,
    };
    phase.scheduler().register_all(tasks)
}

async fn complete_object(
    phase: &Arc<ExecutionPhase>,
    task: TaskId,
    set: &Arc<SelectionSet>,
    value: Value,
    target: &FieldTarget,
) -> Result<Vec<TaskRef>, ExecutionError> {
    match value {
        Value::Null => {
            null_value(phase, task, target)?;
            return Ok(Vec::new());
        }
        Value::Object(_) => {}
        other => {
            field_failure(phase, task, target, format!("Expected an object, found {}", other))?;
            return Ok(Vec::new());
        }
    }

    let value = Arc::new(value);
    let results = phase.request().results();
    let map = results.rent_map(
        set.selections_for(&value).len(),
        Some(target.slot),
        target.nullable,
    )?;
    results.set_value(target.slot, &target.name, ResultValue::Node(map))?;
    populate_object(phase, Some(task), map, set, &value, &target.path, false).await
}

fn complete_scalar(
    phase: &ExecutionPhase,
    task: TaskId,
    selection: &Selection,
    value: Value,
    target: &FieldTarget,
) -> Result<(), ExecutionError> {
    let results = phase.request().results();
    match selection.field_type() {
        FieldType::Leaf(leaf) => {
            if value.is_null() {
                return null_value(phase, task, target);
            }
            match leaf.coerce(&value) {
                Ok(value) => {
                    results.set_value(target.slot, &target.name, ResultValue::Leaf(value))?;
                    Ok(())
                }
                Err(message) => field_failure(phase, task, target, message),
            }
        }
        FieldType::LeafList(leaf) => {
            let items = match value {
                Value::Null => return null_value(phase, task, target),
                Value::Array(items) => items,
                other => {
                    return field_failure(
                        phase,
                        task,
                        target,
                        format!("Expected a list, found {}", other),
                    )
                }
            };
            let list = results.rent_list(items.len(), Some(target.slot), target.nullable)?;
            results.set_value(target.slot, &target.name, ResultValue::Node(list))?;

            for (index, item) in items.iter().enumerate() {
                if item.is_null() {
                    continue;
                }
                match leaf.coerce(item) {
                    Ok(item) => results.set_value(
                        ParentRef::new(list, index),
                        &target.name,
                        ResultValue::Leaf(item),
                    )?,
                    Err(message) => phase.report(
                        task,
                        FieldError::new(message),
                        &target.path.with_index(index),
                    ),
                }
            }
            Ok(())
        }
        FieldType::Object | FieldType::ObjectList => Err(ExecutionError::InvalidOperation(
            format!("'{}' is not a leaf field", selection.field_name()),
        )),
    }
}

fn field_failure(
    phase: &ExecutionPhase,
    task: TaskId,
    target: &FieldTarget,
    message: impl Into<String>,
) -> Result<(), ExecutionError> {
    phase.report(task, FieldError::new(message), &target.path);
    null_field(phase, target)
}

/// A resolved null; non-null fields report it before propagating
fn null_value(
    phase: &ExecutionPhase,
    task: TaskId,
    target: &FieldTarget,
) -> Result<(), ExecutionError> {
    if target.nullable {
        return null_field(phase, target);
    }
    field_failure(
        phase,
        task,
        target,
        format!("Cannot return null for non-nullable field '{}'", target.name),
    )
}

pub(crate) fn null_field(phase: &ExecutionPhase, target: &FieldTarget) -> Result<(), ExecutionError> {
    phase
        .request()
        .results()
        .set_null(target.slot, &target.name, target.nullable)?;
    Ok(())
}
