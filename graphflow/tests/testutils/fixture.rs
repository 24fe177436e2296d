//! Executor fixture and instrumented collaborators

use async_trait::async_trait;
use futures::StreamExt;
use graphflow::exec::{
    ExecutionError, RequestContext, TransactionScope, TransactionScopeHandler,
};
use graphflow::{
    BatchKey, BatchLoader, ExecutionRequest, ExecutorConfig, FieldContext, FieldError,
    Operation, OperationExecutor, QueryResult, Resolved, Resolver,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Executor plus helpers to run operations against it
pub struct ExecutorFixture {
    pub executor: OperationExecutor,
}

impl ExecutorFixture {
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        init_logging();
        Self {
            executor: OperationExecutor::new(config),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn BatchLoader>) -> Self {
        self.executor = self.executor.with_loader(loader);
        self
    }

    pub fn with_transactions(mut self, handler: Arc<dyn TransactionScopeHandler>) -> Self {
        self.executor = self.executor.with_transaction_handler(handler);
        self
    }

    /// Execute and expect a single, non-streamed result
    pub async fn run(&self, request: ExecutionRequest) -> QueryResult {
        self.executor
            .execute(request)
            .await
            .expect("Execution failed")
            .into_single()
            .expect("Expected a single result")
    }

    pub async fn run_operation(&self, operation: Operation) -> QueryResult {
        self.run(ExecutionRequest::new(operation)).await
    }

    /// Execute and collect every element of the result stream
    pub async fn run_stream(&self, request: ExecutionRequest) -> Vec<QueryResult> {
        let stream = self
            .executor
            .execute(request)
            .await
            .expect("Execution failed")
            .into_stream()
            .expect("Expected a result stream");
        stream.collect().await
    }
}

/// Shared start/end log across several recording resolvers
#[derive(Debug, Default)]
pub struct ExecutionLog {
    events: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ExecutionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Names in the order their resolvers started
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| event.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    /// Highest number of resolvers observed running at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self, name: &str) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.events.lock().push(format!("start:{}", name));
    }

    fn exit(&self, name: &str) {
        self.events.lock().push(format!("end:{}", name));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sleeps, then returns a fixed value while recording start and end
pub struct RecordingResolver {
    name: String,
    value: Value,
    delay: Duration,
    log: Arc<ExecutionLog>,
}

impl RecordingResolver {
    pub fn shared(
        name: &str,
        value: Value,
        delay: Duration,
        log: &Arc<ExecutionLog>,
    ) -> Arc<dyn Resolver> {
        Arc::new(Self {
            name: name.to_string(),
            value,
            delay,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Resolver for RecordingResolver {
    async fn resolve(&self, _ctx: &FieldContext<'_>) -> Result<Resolved, FieldError> {
        self.log.enter(&self.name);
        tokio::time::sleep(self.delay).await;
        self.log.exit(&self.name);
        Ok(Resolved::Value(self.value.clone()))
    }
}

/// Returns its value after a delay
pub struct SlowResolver {
    value: Value,
    delay: Duration,
}

impl SlowResolver {
    pub fn shared(value: Value, delay: Duration) -> Arc<dyn Resolver> {
        Arc::new(Self { value, delay })
    }
}

#[async_trait]
impl Resolver for SlowResolver {
    async fn resolve(&self, _ctx: &FieldContext<'_>) -> Result<Resolved, FieldError> {
        tokio::time::sleep(self.delay).await;
        Ok(Resolved::Value(self.value.clone()))
    }
}

/// Always fails with the given message
pub struct FailingResolver {
    message: String,
}

impl FailingResolver {
    pub fn shared(message: &str) -> Arc<dyn Resolver> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl Resolver for FailingResolver {
    async fn resolve(&self, _ctx: &FieldContext<'_>) -> Result<Resolved, FieldError> {
        Err(FieldError::new(self.message.clone()))
    }
}

/// Resolves to a batched load of `users` keyed by the parent's `userId`
pub struct UserRefResolver;

impl UserRefResolver {
    pub fn shared() -> Arc<dyn Resolver> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Resolver for UserRefResolver {
    async fn resolve(&self, ctx: &FieldContext<'_>) -> Result<Resolved, FieldError> {
        match ctx.parent().get("userId").and_then(Value::as_str) {
            Some(id) => Ok(Resolved::Load(BatchKey::new("users", id))),
            None => Ok(Resolved::Value(Value::Null)),
        }
    }
}

/// Loader over a fixed user table that records every call
#[derive(Debug, Default)]
pub struct UserLoader {
    users: HashMap<String, Value>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl UserLoader {
    pub fn new(users: Vec<(&str, Value)>) -> Arc<Self> {
        Arc::new(Self {
            users: users
                .into_iter()
                .map(|(id, user)| (id.to_string(), user))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl BatchLoader for UserLoader {
    fn name(&self) -> &str {
        "users"
    }

    async fn load(&self, keys: &[String]) -> Result<HashMap<String, Value>, FieldError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        self.calls.lock().push(sorted);
        Ok(keys
            .iter()
            .filter_map(|key| self.users.get(key).map(|user| (key.clone(), user.clone())))
            .collect())
    }
}

/// Counts created and completed transaction scopes
#[derive(Debug, Default)]
pub struct CountingTransactions {
    created: AtomicUsize,
    completed: Arc<AtomicUsize>,
}

impl CountingTransactions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

struct CountingScope {
    completed: Arc<AtomicUsize>,
}

impl TransactionScope for CountingScope {
    fn complete(&mut self) -> Result<(), ExecutionError> {
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl TransactionScopeHandler for CountingTransactions {
    fn create(&self, _request: &RequestContext) -> Result<Box<dyn TransactionScope>, ExecutionError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingScope {
            completed: self.completed.clone(),
        }))
    }
}

/// `users` loader that answers every key after a delay
#[derive(Debug)]
pub struct SlowLoader {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowLoader {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchLoader for SlowLoader {
    fn name(&self) -> &str {
        "users"
    }

    async fn load(&self, keys: &[String]) -> Result<HashMap<String, Value>, FieldError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), Value::String(key.clone())))
            .collect())
    }
}

/// Transactions whose commit always fails
#[derive(Debug, Default)]
pub struct RejectingTransactions;

struct RejectingScope;

impl TransactionScope for RejectingScope {
    fn complete(&mut self) -> Result<(), ExecutionError> {
        Err(ExecutionError::Transaction("commit rejected".to_string()))
    }
}

impl TransactionScopeHandler for RejectingTransactions {
    fn create(&self, _request: &RequestContext) -> Result<Box<dyn TransactionScope>, ExecutionError> {
        Ok(Box::new(RejectingScope))
    }
}
