// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deferred work scheduler and the incremental result stream

use super::backlog::{DeferredEntry, DeferredWorkBacklog};
use super::{DeferredExecutionTask, DeferredMode, DeferredPayload, DeferredResult, DeferredTaskId};
use crate::exec::error::{ExecutionError, FieldError};
use crate::exec::response::QueryResult;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct DeferredState {
    backlog: DeferredWorkBacklog,
    completed: VecDeque<DeferredResult>,
    running: usize,
}

/// Holds deferred units until the primary response is complete, then runs
/// them and hands out their results in completion order
pub struct DeferredWorkScheduler {
    mode: DeferredMode,
    state: Mutex<DeferredState>,
    notify: Notify,
    next_id: AtomicU64,
    primary_completed: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for DeferredWorkScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeferredWorkScheduler")
            .field("mode", &self.mode)
            .field("backlog", &state.backlog.len())
            .field("running", &state.running)
            .field("completed", &state.completed.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Runs the finish callback when the stream ends or is dropped early
struct FinishGuard(Option<Box<dyn FnOnce() + Send>>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if let Some(on_finish) = self.0.take() {
            on_finish();
        }
    }
}

struct StreamState {
    scheduler: Arc<DeferredWorkScheduler>,
    initial: Option<QueryResult>,
    _finish: FinishGuard,
}

impl DeferredWorkScheduler {
    pub fn new(mode: DeferredMode) -> Self {
        Self {
            mode,
            state: Mutex::new(DeferredState::default()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            primary_completed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> DeferredMode {
        self.mode
    }

    /// Add a unit to the backlog and return its id
    pub fn register(
        &self,
        task: Arc<dyn DeferredExecutionTask>,
        parent: DeferredTaskId,
    ) -> DeferredTaskId {
        let id = DeferredTaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        if self.is_closed() {
            log::debug!("Ignoring {} registered after the request was disposed", id);
            return id;
        }
        log::debug!("Registered {} under {}", id, parent);
        self.state
            .lock()
            .backlog
            .register(DeferredEntry { id, parent, task });
        self.notify.notify_one();
        id
    }

    /// Allow deferred work to start
    pub fn mark_primary_completed(&self) {
        self.primary_completed.store(true, Ordering::SeqCst);
    }

    pub fn is_primary_completed(&self) -> bool {
        self.primary_completed.load(Ordering::SeqCst)
    }

    /// Take one unit for execution; nothing is handed out before the
    /// primary response is complete
    pub fn try_take(&self) -> Option<DeferredEntry> {
        if !self.is_primary_completed() {
            return None;
        }
        let mut state = self.state.lock();
        let entry = state.backlog.try_take()?;
        state.running += 1;
        Some(entry)
    }

    /// Record the outcome of a unit handed out by `try_take`; results
    /// arriving after `clear` are discarded
    pub fn complete(&self, result: DeferredResult) -> Result<(), ExecutionError> {
        {
            let mut state = self.state.lock();
            if self.is_closed() {
                log::debug!(
                    "Discarding {} completed after the request was disposed",
                    result.task_id
                );
                return Ok(());
            }
            if state.running == 0 {
                return Err(ExecutionError::InvariantViolation(format!(
                    "{} completed but no deferred work is running",
                    result.task_id
                )));
            }
            state.running -= 1;
            log::debug!("Completed {}", result.task_id);
            state.completed.push_back(result);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Deferred work is waiting, running, or completed but not yet emitted
    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        !state.backlog.is_empty() || state.running > 0 || !state.completed.is_empty()
    }

    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Build the incremental stream: `initial` first, then every deferred
    /// result in completion order; `on_finish` runs once when the stream
    /// ends or is dropped
    pub fn create_result_stream<F>(
        self: &Arc<Self>,
        initial: QueryResult,
        on_finish: F,
    ) -> BoxStream<'static, QueryResult>
    where
        F: FnOnce() + Send + 'static,
    {
        self.mark_primary_completed();
        let state = StreamState {
            scheduler: self.clone(),
            initial: Some(initial),
            _finish: FinishGuard(Some(Box::new(on_finish))),
        };

        stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            if let Some(mut initial) = state.initial.take() {
                let has_next = state.scheduler.has_pending();
                initial.has_next = Some(has_next);
                return Some((initial, has_next.then_some(state)));
            }

            let result = state.scheduler.next_result().await?;
            let has_next = state.scheduler.has_pending();
            Some((
                QueryResult::from_deferred(result, has_next),
                has_next.then_some(state),
            ))
        })
        .boxed()
    }

    async fn next_result(self: &Arc<Self>) -> Option<DeferredResult> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(result) = state.completed.pop_front() {
                    return Some(result);
                }
            }

            match self.mode {
                DeferredMode::Eager => {
                    while let Some(entry) = self.try_take() {
                        self.spawn(entry);
                    }
                }
                DeferredMode::OnDemand => {
                    let idle = self.state.lock().running == 0;
                    if idle {
                        if let Some(entry) = self.try_take() {
                            self.spawn(entry);
                        }
                    }
                }
            }

            {
                let state = self.state.lock();
                if state.running == 0 && state.backlog.is_empty() && state.completed.is_empty() {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn spawn(self: &Arc<Self>, entry: DeferredEntry) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let payload = AssertUnwindSafe(entry.task.execute(entry.id, &scheduler))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    log::error!("{} panicked", entry.id);
                    DeferredPayload {
                        data: None,
                        errors: vec![FieldError::new("Deferred execution panicked")
                            .with_path(entry.task.path())],
                    }
                });

            let result = DeferredResult {
                task_id: entry.id,
                parent_task_id: entry.parent,
                label: entry.task.label().map(str::to_string),
                path: entry.task.path(),
                payload,
            };
            if let Err(error) = scheduler.complete(result) {
                log::error!("{}", error);
            }
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop all deferred work and close the scheduler; units still running
    /// finish detached and their results are discarded
    pub fn clear(&self) {
        let mut state = self.state.lock();
        self.closed.store(true, Ordering::SeqCst);
        state.backlog.clear();
        state.completed.clear();
        state.running = 0;
        self.primary_completed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResponsePath;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Sleepy {
        name: &'static str,
        millis: u64,
    }

    #[async_trait]
    impl DeferredExecutionTask for Sleepy {
        fn label(&self) -> Option<&str> {
            Some(self.name)
        }

        fn path(&self) -> ResponsePath {
            ResponsePath::root().with_field(self.name)
        }

        async fn execute(
            &self,
            _id: DeferredTaskId,
            _deferred: &Arc<DeferredWorkScheduler>,
        ) -> DeferredPayload {
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            DeferredPayload {
                data: Some(json!({ "name": self.name })),
                errors: Vec::new(),
            }
        }
    }

    struct Nesting;

    #[async_trait]
    impl DeferredExecutionTask for Nesting {
        fn path(&self) -> ResponsePath {
            ResponsePath::root()
        }

        async fn execute(
            &self,
            id: DeferredTaskId,
            deferred: &Arc<DeferredWorkScheduler>,
        ) -> DeferredPayload {
            deferred.register(Arc::new(Sleepy { name: "inner", millis: 0 }), id);
            DeferredPayload::default()
        }
    }

    #[test]
    fn test_nothing_taken_before_primary_completion() {
        let deferred = DeferredWorkScheduler::new(DeferredMode::Eager);
        deferred.register(Arc::new(Sleepy { name: "a", millis: 0 }), DeferredTaskId::ROOT);

        assert!(deferred.try_take().is_none());
        deferred.mark_primary_completed();
        assert!(deferred.try_take().is_some());
        assert!(deferred.try_take().is_none());
    }

    #[test]
    fn test_complete_without_running_is_violation() {
        let deferred = DeferredWorkScheduler::new(DeferredMode::Eager);
        let result = DeferredResult {
            task_id: DeferredTaskId::new(1),
            parent_task_id: DeferredTaskId::ROOT,
            label: None,
            path: ResponsePath::root(),
            payload: DeferredPayload::default(),
        };
        assert!(matches!(
            deferred.complete(result),
            Err(ExecutionError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_completion_after_clear_is_discarded() {
        let deferred = DeferredWorkScheduler::new(DeferredMode::Eager);
        deferred.register(Arc::new(Sleepy { name: "a", millis: 0 }), DeferredTaskId::ROOT);
        deferred.mark_primary_completed();
        let entry = deferred.try_take().unwrap();

        deferred.clear();
        assert!(deferred.is_closed());

        let result = DeferredResult {
            task_id: entry.id,
            parent_task_id: entry.parent,
            label: None,
            path: ResponsePath::root(),
            payload: DeferredPayload::default(),
        };
        assert!(deferred.complete(result).is_ok());
        assert!(!deferred.has_pending());

        deferred.register(Arc::new(Sleepy { name: "b", millis: 0 }), DeferredTaskId::ROOT);
        assert_eq!(deferred.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_stream_emits_in_completion_order() {
        let deferred = Arc::new(DeferredWorkScheduler::new(DeferredMode::Eager));
        let a = deferred.register(Arc::new(Sleepy { name: "a", millis: 60 }), DeferredTaskId::ROOT);
        let b = deferred.register(Arc::new(Sleepy { name: "b", millis: 0 }), a);

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let results: Vec<QueryResult> = deferred
            .create_result_stream(QueryResult::default(), move || {
                flag.store(true, Ordering::SeqCst)
            })
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].has_next, Some(true));
        assert_eq!(results[1].task_id, Some(b));
        assert_eq!(results[1].parent_task_id, Some(a));
        assert_eq!(results[2].task_id, Some(a));
        assert_eq!(results[2].has_next, Some(false));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_on_demand_runs_nested_work() {
        let deferred = Arc::new(DeferredWorkScheduler::new(DeferredMode::OnDemand));
        let outer = deferred.register(Arc::new(Nesting), DeferredTaskId::ROOT);

        let results: Vec<QueryResult> = deferred
            .create_result_stream(QueryResult::default(), || {})
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[1].task_id, Some(outer));
        assert_eq!(results[2].parent_task_id, Some(outer));
        assert_eq!(results[2].label.as_deref(), Some("inner"));
        assert!(!deferred.has_pending());
    }

    #[tokio::test]
    async fn test_stream_without_deferred_work_is_single() {
        let deferred = Arc::new(DeferredWorkScheduler::new(DeferredMode::Eager));
        let results: Vec<QueryResult> = deferred
            .create_result_stream(QueryResult::default(), || {})
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].has_next, Some(false));
    }
}
