// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Request-scoped work scheduler
//!
//! The drive loop pops the parallel lane (LIFO) and spawns those tasks onto
//! the runtime without waiting for them. Serial tasks run one at a time on
//! the drive loop itself, and only when no parallel work is queued or
//! running, so a serial field and its subtree finish before the next serial
//! field starts. Pending batch keys are flushed when the parallel lane is
//! quiescent. The loop parks on a `Notify` whenever nothing is runnable and
//! is woken by the next completion, admission, resume or cancellation.

use super::queue::{QueueOrder, WorkQueue};
use super::state::{Admission, TaskStateMachine};
use super::stats::TaskStatistics;
use super::task::{ExecutionKind, TaskId, TaskRef};
use crate::batch::{BatchDispatcher, BatchKey, BatchScope, SuspendGuard};
use crate::exec::context::ExecutionId;
use crate::exec::error::ExecutionError;
use crate::plan::{ExecutionStrategy, Selection};
use crate::result::Poolable;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Suspended,
    Queued,
    Running { serial: bool },
    Completed,
}

/// The request a scheduler is currently driving
#[derive(Debug, Clone)]
struct Binding {
    execution: ExecutionId,
    batch: Arc<BatchScope>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct SchedulerState {
    parallel: WorkQueue,
    serial: WorkQueue,
    machine: TaskStateMachine,
    stats: TaskStatistics,
    tasks: HashMap<TaskId, TaskStatus>,
    sequence: u64,
    fatal: Option<ExecutionError>,
    binding: Option<Binding>,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            parallel: WorkQueue::new(QueueOrder::Lifo),
            serial: WorkQueue::new(QueueOrder::Ordinal),
            machine: TaskStateMachine::new(),
            stats: TaskStatistics::new(),
            tasks: HashMap::new(),
            sequence: 0,
            fatal: None,
            binding: None,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.binding
            .as_ref()
            .map(|binding| binding.cancel.is_cancelled())
            .unwrap_or(false)
    }

    fn admit(&mut self, task: TaskRef) -> Result<(), ExecutionError> {
        let id = task.id();
        if self.tasks.contains_key(&id) {
            return Err(ExecutionError::InvariantViolation(format!(
                "{} registered twice",
                id
            )));
        }
        if self.is_cancelled() {
            log::trace!("Dropping {} registered after cancellation", id);
            return Ok(());
        }

        self.stats.task_created();
        match self.machine.admit(task) {
            Admission::Runnable(task) => self.enqueue(task),
            Admission::Suspended => {
                self.tasks.insert(id, TaskStatus::Suspended);
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, task: TaskRef) {
        self.tasks.insert(task.id(), TaskStatus::Queued);
        self.sequence += 1;
        if task.is_serial() {
            self.serial.push(task, self.sequence);
        } else {
            self.parallel.push(task, self.sequence);
        }
    }

    fn start(&mut self, task: &TaskRef, serial: bool) -> Result<(), ExecutionError> {
        self.stats.task_started()?;
        self.tasks.insert(task.id(), TaskStatus::Running { serial });
        Ok(())
    }

    fn running(&self) -> usize {
        self.parallel.running() + self.serial.running()
    }

    /// Drop queued and suspended work; it is counted as completed
    fn discard_waiting(&mut self) {
        let discarded =
            self.parallel.drain() + self.serial.drain() + self.machine.drain_suspended();
        if discarded == 0 {
            return;
        }
        log::debug!("Discarding {} tasks that never started", discarded);
        for status in self.tasks.values_mut() {
            if matches!(status, TaskStatus::Queued | TaskStatus::Suspended) {
                *status = TaskStatus::Completed;
            }
        }
        if let Err(error) = self.stats.tasks_discarded(discarded) {
            self.fatal.get_or_insert(error);
        }
    }
}

enum Step {
    /// Run on the drive loop and wait for it
    Inline(TaskRef),
    /// Run on the drive loop with batch flushing suspended
    Serial(TaskRef),
    /// Hand to the runtime and continue
    Spawn(TaskRef),
    Flush,
    Wait,
    /// Cancelled or failed, waiting for running tasks to finish
    Drain,
    Done,
}

/// Drives the tasks of one request to completion
pub struct WorkScheduler {
    state: Mutex<SchedulerState>,
    notify: Arc<Notify>,
    dispatcher: Arc<dyn BatchDispatcher>,
    inline_pure_fields: bool,
}

impl fmt::Debug for WorkScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkScheduler")
            .field("parallel", &state.parallel.len())
            .field("serial", &state.serial.len())
            .field("suspended", &state.machine.suspended_count())
            .field("stats", &state.stats)
            .finish()
    }
}

impl WorkScheduler {
    pub fn new(dispatcher: Arc<dyn BatchDispatcher>, inline_pure_fields: bool) -> Self {
        Self {
            state: Mutex::new(SchedulerState::new()),
            notify: Arc::new(Notify::new()),
            dispatcher,
            inline_pure_fields,
        }
    }

    /// Attach the scheduler to a request before any task is registered
    pub fn bind(
        &self,
        execution: ExecutionId,
        batch: Arc<BatchScope>,
        cancel: CancellationToken,
    ) -> Result<(), ExecutionError> {
        let mut state = self.state.lock();
        if state.binding.is_some() {
            return Err(ExecutionError::InvariantViolation(
                "work scheduler is already bound to a request".to_string(),
            ));
        }
        state.binding = Some(Binding {
            execution,
            batch,
            cancel,
        });
        Ok(())
    }

    pub fn dispatcher(&self) -> &Arc<dyn BatchDispatcher> {
        &self.dispatcher
    }

    /// Admit a newly created task
    pub fn register(&self, task: TaskRef) -> Result<(), ExecutionError> {
        self.state.lock().admit(task)?;
        self.notify.notify_one();
        Ok(())
    }

    /// Admit sibling tasks so that they are popped in the given order
    pub fn register_all(&self, tasks: Vec<TaskRef>) -> Result<(), ExecutionError> {
        if tasks.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.state.lock();
            let (serial, parallel): (Vec<_>, Vec<_>) =
                tasks.into_iter().partition(|task| task.is_serial());
            for task in serial {
                state.admit(task)?;
            }
            // LIFO lane: push the last sibling first
            for task in parallel.into_iter().rev() {
                state.admit(task)?;
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Record that a running task finished and release its dependents
    pub fn complete(&self, id: TaskId) -> Result<(), ExecutionError> {
        {
            let mut state = self.state.lock();
            let serial = match state.tasks.get(&id) {
                Some(TaskStatus::Running { serial }) => *serial,
                Some(status) => {
                    return Err(ExecutionError::InvariantViolation(format!(
                        "{} completed while {:?}",
                        id, status
                    )))
                }
                None => {
                    return Err(ExecutionError::InvariantViolation(format!(
                        "{} completed but was never registered",
                        id
                    )))
                }
            };

            if serial {
                state.serial.mark_completed()?;
            } else {
                state.parallel.mark_completed()?;
            }
            state.stats.task_completed()?;
            state.tasks.insert(id, TaskStatus::Completed);
            log::trace!("Completed {}", id);

            for task in state.machine.task_completed(id) {
                state.enqueue(task);
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Admit tasks waiting on freshly fetched batch keys
    pub fn signal_batch(&self, keys: Vec<BatchKey>) {
        {
            let mut state = self.state.lock();
            for key in keys {
                for task in state.machine.batch_resolved(key) {
                    state.enqueue(task);
                }
            }
        }
        self.notify.notify_one();
    }

    /// True when a field can be resolved inside its parent's task
    pub fn can_be_inlined(&self, selection: &Selection) -> bool {
        self.inline_pure_fields
            && selection.has_pure_resolver()
            && selection.strategy() != ExecutionStrategy::Serial
            && selection.selection_set().is_none()
    }

    pub fn statistics(&self) -> TaskStatistics {
        self.state.lock().stats.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().stats.is_completed()
    }

    /// Clear lanes, suspended set, statistics and binding for reuse
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.parallel.clear();
        state.serial.clear();
        state.machine.clear();
        state.stats.reset();
        state.tasks.clear();
        state.sequence = 0;
        state.fatal = None;
        state.binding = None;
    }

    /// Drive every registered task to completion
    pub async fn execute(self: &Arc<Self>) -> Result<(), ExecutionError> {
        let binding = self.state.lock().binding.clone().ok_or_else(|| {
            ExecutionError::InvariantViolation(
                "work scheduler executed without a request binding".to_string(),
            )
        })?;

        self.dispatcher.register(
            binding.execution,
            binding.cancel.clone(),
            self.notify.clone(),
        )?;
        let outcome = self.drive(&binding).await;
        let unregistered = self.dispatcher.unregister(binding.execution);

        if let Err(error) = &outcome {
            log::error!("Execution {} failed: {}", binding.execution, error);
        }
        outcome?;
        unregistered
    }

    async fn drive(self: &Arc<Self>, binding: &Binding) -> Result<(), ExecutionError> {
        loop {
            match self.next_step(binding)? {
                Step::Inline(task) => self.clone().run(task).await,
                Step::Serial(task) => {
                    let _guard = SuspendGuard::new(self.dispatcher.clone());
                    self.clone().run(task).await;
                }
                Step::Spawn(task) => {
                    tokio::spawn(self.clone().run(task));
                }
                Step::Flush => {
                    let resolved = tokio::select! {
                        resolved = self.dispatcher.dispatch(binding.execution, &binding.batch) => resolved?,
                        _ = binding.cancel.cancelled() => Vec::new(),
                    };
                    if !resolved.is_empty() {
                        log::debug!(
                            "Batch flush resolved {} keys for execution {}",
                            resolved.len(),
                            binding.execution
                        );
                        self.state.lock().stats.batch_dispatched();
                        self.signal_batch(resolved);
                    }
                }
                Step::Wait => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = binding.cancel.cancelled() => {}
                    }
                }
                Step::Drain => self.notify.notified().await,
                Step::Done => return Ok(()),
            }
        }
    }

    fn next_step(&self, binding: &Binding) -> Result<Step, ExecutionError> {
        let mut state = self.state.lock();

        if state.fatal.is_some() || binding.cancel.is_cancelled() {
            state.discard_waiting();
            if state.running() > 0 {
                return Ok(Step::Drain);
            }
            return match state.fatal.take() {
                Some(error) => Err(error),
                None => {
                    log::warn!("Execution {} cancelled", binding.execution);
                    Ok(Step::Done)
                }
            };
        }

        if let Some(task) = state.parallel.pop() {
            state.start(&task, false)?;
            return Ok(match task.kind() {
                ExecutionKind::Pure | ExecutionKind::Inline => Step::Inline(task),
                _ => Step::Spawn(task),
            });
        }
        if !state.parallel.is_idle() {
            return Ok(Step::Wait);
        }

        if binding.batch.has_pending() {
            return Ok(if self.dispatcher.is_suspended() {
                Step::Wait
            } else {
                Step::Flush
            });
        }

        if let Some(task) = state.serial.pop() {
            state.start(&task, true)?;
            return Ok(Step::Serial(task));
        }

        if state.stats.is_completed() {
            return Ok(Step::Done);
        }
        if state.machine.has_suspended() {
            let suspended = state.machine.suspended_count();
            log::warn!(
                "Execution {} stalled with {} suspended tasks",
                binding.execution,
                suspended
            );
            return Err(ExecutionError::Stalled(suspended));
        }
        Err(ExecutionError::InvariantViolation(format!(
            "scheduler idle with {} of {} tasks completed",
            state.stats.completed_tasks(),
            state.stats.all_tasks()
        )))
    }

    async fn run(self: Arc<Self>, task: TaskRef) {
        let id = task.id();
        log::trace!("Running {}", id);
        if AssertUnwindSafe(task.execute()).catch_unwind().await.is_err() {
            self.fail(ExecutionError::TaskPanicked(id));
        }
        if let Err(error) = self.complete(id) {
            self.fail(error);
        }
    }

    fn fail(&self, error: ExecutionError) {
        log::error!("Scheduler failure: {}", error);
        self.state.lock().fatal.get_or_insert(error);
        self.notify.notify_one();
    }
}

impl Poolable for Arc<WorkScheduler> {
    fn reset(&mut self) {
        WorkScheduler::reset(self);
    }
}
