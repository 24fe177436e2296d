// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Request and phase contexts
//!
//! A request owns its result tree and deferred scheduler. Each scheduler run
//! inside the request (the primary response, then every deferred fragment)
//! is a phase with its own pooled work scheduler, batch scope and
//! cancellation child.

use super::config::ExecutorConfig;
use super::error::{ExecutionError, FieldError};
use super::resolver::{DefaultErrorHandler, ErrorHandler, FieldContext};
use super::transaction::{NoopTransactionScopeHandler, TransactionScopeHandler};
use crate::batch::{
    BatchDispatcher, BatchScope, LoaderRegistry, NoopBatchDispatcher, SharedBatchDispatcher,
};
use crate::defer::{DeferredTaskId, DeferredWorkScheduler};
use crate::plan::{Operation, Selection};
use crate::result::{ObjectPool, ResponsePath, ResultBuilder, ResultPool};
use crate::scheduler::{TaskId, TaskRef, TaskStatistics, WorkScheduler};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier of one execution registered with a batch dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        ExecutionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec_{}", self.0.simple())
    }
}

/// Long-lived collaborators shared by every request of one executor
#[derive(Clone)]
pub struct ExecutorServices {
    pub(crate) config: Arc<ExecutorConfig>,
    pub(crate) dispatcher: Arc<dyn BatchDispatcher>,
    pub(crate) schedulers: Arc<ObjectPool<Arc<WorkScheduler>>>,
    pub(crate) result_pool: Arc<ResultPool>,
    pub(crate) loaders: Arc<LoaderRegistry>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) transactions: Arc<dyn TransactionScopeHandler>,
}

impl ExecutorServices {
    pub fn new(config: ExecutorConfig) -> Self {
        let dispatcher: Arc<dyn BatchDispatcher> = if config.enable_batching {
            Arc::new(SharedBatchDispatcher::new(config.max_concurrent_dispatches))
        } else {
            Arc::new(NoopBatchDispatcher::new())
        };
        let schedulers = Self::scheduler_pool(&config, &dispatcher);
        let result_pool = Arc::new(ResultPool::new(
            config.result_buffer_capacity,
            config.max_pooled_buffers,
        ));

        Self {
            config: Arc::new(config),
            dispatcher,
            schedulers,
            result_pool,
            loaders: Arc::new(LoaderRegistry::new()),
            error_handler: Arc::new(DefaultErrorHandler),
            transactions: Arc::new(NoopTransactionScopeHandler),
        }
    }

    fn scheduler_pool(
        config: &ExecutorConfig,
        dispatcher: &Arc<dyn BatchDispatcher>,
    ) -> Arc<ObjectPool<Arc<WorkScheduler>>> {
        let dispatcher = dispatcher.clone();
        let inline_pure_fields = config.inline_pure_fields;
        Arc::new(ObjectPool::new(config.max_pooled_schedulers, move || {
            Arc::new(WorkScheduler::new(dispatcher.clone(), inline_pure_fields))
        }))
    }

    /// Replace the dispatcher; pooled schedulers bound to the old one are dropped
    pub(crate) fn set_dispatcher(&mut self, dispatcher: Arc<dyn BatchDispatcher>) {
        self.schedulers = Self::scheduler_pool(&self.config, &dispatcher);
        self.dispatcher = dispatcher;
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<dyn BatchDispatcher> {
        &self.dispatcher
    }

    pub fn result_pool(&self) -> &Arc<ResultPool> {
        &self.result_pool
    }

    /// Idle schedulers waiting for reuse
    pub fn pooled_schedulers(&self) -> usize {
        self.schedulers.pooled()
    }
}

impl fmt::Debug for ExecutorServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorServices")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("loaders", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// State of one executing request
pub struct RequestContext {
    id: ExecutionId,
    services: ExecutorServices,
    operation: Operation,
    root_value: Value,
    variables: Map<String, Value>,
    context_data: Option<Arc<dyn Any + Send + Sync>>,
    results: ResultBuilder,
    deferred: Arc<DeferredWorkScheduler>,
    cancel: CancellationToken,
    next_task_id: AtomicU64,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("operation", &self.operation.name())
            .field("kind", &self.operation.kind())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RequestContext {
    pub fn new(
        services: ExecutorServices,
        operation: Operation,
        root_value: Value,
        variables: Map<String, Value>,
        context_data: Option<Arc<dyn Any + Send + Sync>>,
        cancel: CancellationToken,
    ) -> Self {
        let results = ResultBuilder::new(services.result_pool.clone());
        let deferred = Arc::new(DeferredWorkScheduler::new(services.config.deferred_mode));
        Self {
            id: ExecutionId::new(),
            services,
            operation,
            root_value,
            variables,
            context_data,
            results,
            deferred,
            cancel,
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn root_value(&self) -> &Value {
        &self.root_value
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Request-scoped services, looked up by type
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context_data
            .as_deref()
            .and_then(|data| data.downcast_ref::<T>())
    }

    pub fn results(&self) -> &ResultBuilder {
        &self.results
    }

    pub fn deferred(&self) -> &Arc<DeferredWorkScheduler> {
        &self.deferred
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn services(&self) -> &ExecutorServices {
        &self.services
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_task_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn field_context<'a>(
        &'a self,
        selection: &'a Selection,
        parent: &'a Value,
        path: &'a ResponsePath,
        cancel: &'a CancellationToken,
    ) -> FieldContext<'a> {
        FieldContext::new(
            selection,
            parent,
            path,
            &self.root_value,
            &self.variables,
            self.context_data.as_deref(),
            cancel,
        )
    }

    /// Return every rented result buffer to the pool and drop deferred work
    pub fn dispose(&self) {
        if let Some(owner) = self.results.seal() {
            owner.dispose();
        }
        self.deferred.clear();
        log::debug!("Request {} disposed", self.id);
    }
}

/// One scheduler run inside a request
pub(crate) struct ExecutionPhase {
    id: ExecutionId,
    request: Arc<RequestContext>,
    scheduler: Arc<WorkScheduler>,
    batch: Arc<BatchScope>,
    cancel: CancellationToken,
    deferred_parent: DeferredTaskId,
    errors: Mutex<Vec<FieldError>>,
    fatal: Mutex<Option<ExecutionError>>,
    statistics: Mutex<TaskStatistics>,
    released: AtomicBool,
}

impl fmt::Debug for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPhase")
            .field("id", &self.id)
            .field("request", &self.request.id)
            .field("deferred_parent", &self.deferred_parent)
            .finish()
    }
}

impl ExecutionPhase {
    /// Take a scheduler from the pool and bind it to a new phase
    pub fn start(
        request: &Arc<RequestContext>,
        deferred_parent: DeferredTaskId,
    ) -> Result<Arc<Self>, ExecutionError> {
        let services = &request.services;
        let scheduler = services.schedulers.acquire();
        let batch = Arc::new(BatchScope::new(services.loaders.clone()));
        let cancel = request.cancel.child_token();
        let id = ExecutionId::new();

        if let Err(error) = scheduler.bind(id, batch.clone(), cancel.clone()) {
            services.schedulers.release(scheduler);
            return Err(error);
        }

        Ok(Arc::new(Self {
            id,
            request: request.clone(),
            scheduler,
            batch,
            cancel,
            deferred_parent,
            errors: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            statistics: Mutex::new(TaskStatistics::new()),
            released: AtomicBool::new(false),
        }))
    }

    /// Register the seed tasks and drive them to completion
    ///
    /// The scheduler always goes back to the pool, whatever the outcome.
    pub async fn run(self: &Arc<Self>, roots: Vec<TaskRef>) -> Result<(), ExecutionError> {
        let outcome = match self.scheduler.register_all(roots) {
            Ok(()) => self.scheduler.execute().await,
            Err(error) => Err(error),
        };
        *self.statistics.lock() = self.scheduler.statistics();
        self.release();

        outcome?;
        match self.fatal.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.batch.clear();
        self.request.services.schedulers.release(self.scheduler.clone());
    }

    pub fn request(&self) -> &Arc<RequestContext> {
        &self.request
    }

    pub fn scheduler(&self) -> &Arc<WorkScheduler> {
        &self.scheduler
    }

    pub fn batch(&self) -> &Arc<BatchScope> {
        &self.batch
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deferred_parent(&self) -> DeferredTaskId {
        self.deferred_parent
    }

    /// Normalise a field error and attach it at `path`
    pub fn report(&self, task: TaskId, error: FieldError, path: &ResponsePath) {
        let error = self
            .request
            .services
            .error_handler
            .handle(task, error.with_path(path.clone()));
        self.errors.lock().push(error);
    }

    /// Record a request-fatal error and stop scheduling further work
    pub fn fail(&self, error: ExecutionError) {
        log::error!("Phase {} failed: {}", self.id, error);
        self.fatal.lock().get_or_insert(error);
        self.cancel.cancel();
    }

    pub fn take_errors(&self) -> Vec<FieldError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn statistics(&self) -> TaskStatistics {
        self.statistics.lock().clone()
    }
}
