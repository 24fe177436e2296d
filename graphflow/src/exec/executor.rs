// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Operation executors
//!
//! `OperationExecutor` is the entry point. It owns the collaborators shared
//! across requests (batch dispatcher, scheduler pool, result buffer pool,
//! loaders) and hands each request to the query or mutation executor.

use super::completion::execute_selection_set;
use super::config::ExecutorConfig;
use super::context::{ExecutionPhase, ExecutorServices, RequestContext};
use super::error::{ExecutionError, FieldError};
use super::resolver::ErrorHandler;
use super::response::{ExecutionResult, QueryResult};
use super::transaction::TransactionScopeHandler;
use crate::batch::{BatchDispatcher, BatchLoader};
use crate::defer::DeferredTaskId;
use crate::plan::{Operation, OperationKind};
use crate::result::ResponsePath;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything needed to execute one operation
pub struct ExecutionRequest {
    operation: Operation,
    root_value: Value,
    variables: Map<String, Value>,
    context_data: Option<Arc<dyn Any + Send + Sync>>,
    cancellation: Option<CancellationToken>,
}

impl ExecutionRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            root_value: Value::Object(Map::new()),
            variables: Map::new(),
            context_data: None,
            cancellation: None,
        }
    }

    pub fn with_root_value(mut self, root_value: Value) -> Self {
        self.root_value = root_value;
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Services resolvers look up by type through `FieldContext::data`
    pub fn with_context_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.context_data = Some(Arc::new(data));
        self
    }

    /// Cancelling `token` cancels the request
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Runs the primary phase of a request and builds its result
async fn execute_primary(
    request: &Arc<RequestContext>,
    serial_roots: bool,
) -> Result<QueryResult, ExecutionError> {
    let phase = ExecutionPhase::start(request, DeferredTaskId::ROOT)?;
    let set = request.operation().selection_set().clone();
    let root_value = Arc::new(request.root_value().clone());
    let results = request.results();

    let root = match results.rent_map(set.selections_for(&root_value).len(), None, true) {
        Ok(root) => root,
        Err(error) => {
            phase.release();
            return Err(error.into());
        }
    };
    results.set_root(root);

    execute_selection_set(
        &phase,
        root,
        &set,
        &root_value,
        &ResponsePath::root(),
        serial_roots,
    )
    .await?;

    let mut errors = phase.take_errors();
    if request.is_cancelled() {
        errors.push(FieldError::new(ExecutionError::Cancelled.to_string()));
    }
    let statistics = phase.statistics();
    log::debug!(
        "Request {} completed {} of {} tasks with {} errors",
        request.id(),
        statistics.completed_tasks(),
        statistics.all_tasks(),
        errors.len()
    );

    Ok(QueryResult {
        data: Some(results.to_json(root)?),
        errors,
        statistics: Some(statistics),
        ..Default::default()
    })
}

/// Executes query operations; root fields run on the parallel lane
#[derive(Debug, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub async fn execute(&self, request: &Arc<RequestContext>) -> Result<QueryResult, ExecutionError> {
        execute_primary(request, false).await
    }
}

/// Executes mutation operations
///
/// Root fields are forced onto the serial lane so they run one at a time in
/// document order. The whole operation runs inside a transaction scope that
/// is completed only when execution finished without errors.
#[derive(Debug, Default)]
pub struct MutationExecutor;

impl MutationExecutor {
    pub async fn execute(&self, request: &Arc<RequestContext>) -> Result<QueryResult, ExecutionError> {
        let mut scope = request.services().transactions.create(request)?;
        let result = execute_primary(request, true).await?;

        if result.errors.is_empty() && !request.is_cancelled() {
            scope.complete()?;
        } else {
            log::debug!(
                "Mutation {} left its transaction uncompleted",
                request.id()
            );
        }
        Ok(result)
    }
}

/// Entry point executing queries and mutations
#[derive(Debug)]
pub struct OperationExecutor {
    services: ExecutorServices,
}

impl OperationExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            services: ExecutorServices::new(config),
        }
    }

    /// Make a batch loader available to resolvers under its name
    pub fn with_loader(mut self, loader: Arc<dyn BatchLoader>) -> Self {
        let name: Arc<str> = Arc::from(loader.name());
        Arc::make_mut(&mut self.services.loaders).insert(name, loader);
        self
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.services.error_handler = handler;
        self
    }

    pub fn with_transaction_handler(mut self, handler: Arc<dyn TransactionScopeHandler>) -> Self {
        self.services.transactions = handler;
        self
    }

    /// Share a dispatcher with other executors
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn BatchDispatcher>) -> Self {
        self.services.set_dispatcher(dispatcher);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        self.services.config()
    }

    pub fn services(&self) -> &ExecutorServices {
        &self.services
    }

    /// Execute one operation
    ///
    /// Returns `ExecutionResult::Single` when no deferred work was registered,
    /// otherwise a stream starting with the primary result. Field errors are
    /// part of the result; only request-fatal failures return `Err`.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let cancel = request
            .cancellation
            .map(|token| token.child_token())
            .unwrap_or_else(CancellationToken::new);
        let context = Arc::new(RequestContext::new(
            self.services.clone(),
            request.operation,
            request.root_value,
            request.variables,
            request.context_data,
            cancel,
        ));
        log::debug!(
            "Executing {:?} {} as {}",
            context.operation().kind(),
            context.operation().name().unwrap_or("<anonymous>"),
            context.id()
        );

        let timer = self
            .services
            .config
            .execution_timeout
            .map(|timeout| spawn_timeout(timeout, context.cancellation().clone()));

        let outcome = match context.operation().kind() {
            OperationKind::Query => QueryExecutor.execute(&context).await,
            OperationKind::Mutation => MutationExecutor.execute(&context).await,
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                context.dispose();
                return Err(error);
            }
        };

        if context.is_cancelled() || !context.deferred().has_pending() {
            context.dispose();
            return Ok(ExecutionResult::Single(result));
        }

        let owner = context.clone();
        let stream = context.deferred().create_result_stream(result, move || {
            owner.cancellation().cancel();
            owner.dispose();
        });
        Ok(ExecutionResult::Stream(stream))
    }
}

impl Default for OperationExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

fn spawn_timeout(timeout: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                log::warn!("Execution timed out after {:?}", timeout);
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}
