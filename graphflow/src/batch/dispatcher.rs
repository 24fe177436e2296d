// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Batch dispatcher shared by concurrently executing requests
//!
//! Each execution registers while its scheduler drives work. When that
//! scheduler quiesces with keys pending it asks the dispatcher to flush; the
//! flush is refused while the dispatcher is suspended and registered
//! executions are woken again on resume.

use super::loader::BatchScope;
use super::BatchKey;
use crate::exec::context::ExecutionId;
use crate::exec::error::ExecutionError;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

/// Coordinates batched fetches at scheduler quiescence
#[async_trait]
pub trait BatchDispatcher: Send + Sync + fmt::Debug {
    /// Track an execution; `wake` is notified when flushing becomes possible again
    fn register(
        &self,
        execution: ExecutionId,
        cancel: CancellationToken,
        wake: Arc<Notify>,
    ) -> Result<(), ExecutionError>;

    fn unregister(&self, execution: ExecutionId) -> Result<(), ExecutionError>;

    /// Disable flushing until the matching `resume`
    fn suspend(&self);

    fn resume(&self);

    fn is_suspended(&self) -> bool;

    /// False when loads run immediately instead of being coalesced
    fn is_batching(&self) -> bool {
        true
    }

    /// Flush every pending key of `scope`, returning the keys now resolved
    async fn dispatch(
        &self,
        execution: ExecutionId,
        scope: &BatchScope,
    ) -> Result<Vec<BatchKey>, ExecutionError>;

    /// Number of flushes that fetched at least one key
    fn dispatch_count(&self) -> u64;
}

#[derive(Debug)]
struct Registration {
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

/// Batching dispatcher shared across requests
#[derive(Debug)]
pub struct SharedBatchDispatcher {
    registrations: Mutex<HashMap<ExecutionId, Registration>>,
    suspended: AtomicUsize,
    permits: Semaphore,
    dispatches: AtomicU64,
}

impl SharedBatchDispatcher {
    /// Create a dispatcher allowing `max_concurrent_dispatches` flushes at once
    pub fn new(max_concurrent_dispatches: usize) -> Self {
        Self {
            registrations: Mutex::new(HashMap::new()),
            suspended: AtomicUsize::new(0),
            permits: Semaphore::new(max_concurrent_dispatches.max(1)),
            dispatches: AtomicU64::new(0),
        }
    }

    /// Number of executions currently registered
    pub fn registered(&self) -> usize {
        self.registrations.lock().len()
    }
}

impl Default for SharedBatchDispatcher {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl BatchDispatcher for SharedBatchDispatcher {
    fn register(
        &self,
        execution: ExecutionId,
        cancel: CancellationToken,
        wake: Arc<Notify>,
    ) -> Result<(), ExecutionError> {
        let mut registrations = self.registrations.lock();
        if registrations.contains_key(&execution) {
            return Err(ExecutionError::InvariantViolation(format!(
                "execution {} is already registered with the batch dispatcher",
                execution
            )));
        }
        registrations.insert(execution, Registration { cancel, wake });
        Ok(())
    }

    fn unregister(&self, execution: ExecutionId) -> Result<(), ExecutionError> {
        match self.registrations.lock().remove(&execution) {
            Some(_) => Ok(()),
            None => Err(ExecutionError::InvariantViolation(format!(
                "execution {} was not registered with the batch dispatcher",
                execution
            ))),
        }
    }

    fn suspend(&self) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        let previous =
            self.suspended
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                for registration in self.registrations.lock().values() {
                    registration.wake.notify_one();
                }
            }
            Ok(_) => {}
            Err(_) => log::warn!("Batch dispatcher resumed without a matching suspend"),
        }
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    async fn dispatch(
        &self,
        execution: ExecutionId,
        scope: &BatchScope,
    ) -> Result<Vec<BatchKey>, ExecutionError> {
        let cancel = match self.registrations.lock().get(&execution) {
            Some(registration) => registration.cancel.clone(),
            None => {
                return Err(ExecutionError::InvariantViolation(format!(
                    "dispatch requested for unregistered execution {}",
                    execution
                )))
            }
        };
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let permit = tokio::select! {
            permit = self.permits.acquire() => permit,
            _ = cancel.cancelled() => return Ok(Vec::new()),
        };
        let _permit =
            permit.map_err(|_| ExecutionError::Batch("dispatcher semaphore closed".to_string()))?;

        let batches = scope.take_pending();
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Dispatching {} batch groups for execution {}",
            batches.len(),
            execution
        );

        // Keys taken by an abandoned flush are dropped with the execution
        let fetches = join_all(batches.into_iter().map(|batch| scope.fetch(batch)));
        tokio::select! {
            resolved = fetches => Ok(resolved.into_iter().flatten().collect()),
            _ = cancel.cancelled() => {
                log::debug!("Flush for execution {} abandoned after cancellation", execution);
                Ok(Vec::new())
            }
        }
    }

    fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::SeqCst)
    }
}

/// Suspends a dispatcher for as long as the guard lives
pub struct SuspendGuard {
    dispatcher: Arc<dyn BatchDispatcher>,
}

impl SuspendGuard {
    pub fn new(dispatcher: Arc<dyn BatchDispatcher>) -> Self {
        dispatcher.suspend();
        Self { dispatcher }
    }
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        self.dispatcher.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchLoader, LoaderRegistry};
    use crate::exec::error::FieldError;
    use serde_json::Value;

    struct Echo;

    #[async_trait]
    impl BatchLoader for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn load(&self, keys: &[String]) -> Result<HashMap<String, Value>, FieldError> {
            Ok(keys
                .iter()
                .map(|k| (k.clone(), Value::String(k.clone())))
                .collect())
        }
    }

    struct Hung;

    #[async_trait]
    impl BatchLoader for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        async fn load(&self, _keys: &[String]) -> Result<HashMap<String, Value>, FieldError> {
            futures::future::pending().await
        }
    }

    fn scope() -> BatchScope {
        let mut registry: LoaderRegistry = HashMap::new();
        registry.insert(Arc::from("echo"), Arc::new(Echo));
        registry.insert(Arc::from("hung"), Arc::new(Hung));
        BatchScope::new(Arc::new(registry))
    }

    fn cancel_after(cancel: &CancellationToken, millis: u64) {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            cancel.cancel();
        });
    }

    #[test]
    fn test_register_at_most_once() {
        let dispatcher = SharedBatchDispatcher::default();
        let id = ExecutionId::new();

        dispatcher
            .register(id, CancellationToken::new(), Arc::new(Notify::new()))
            .unwrap();
        assert!(dispatcher
            .register(id, CancellationToken::new(), Arc::new(Notify::new()))
            .is_err());

        dispatcher.unregister(id).unwrap();
        assert!(dispatcher.unregister(id).is_err());
        assert_eq!(dispatcher.registered(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_counts_only_non_empty_flushes() {
        let dispatcher = SharedBatchDispatcher::default();
        let id = ExecutionId::new();
        let scope = scope();
        dispatcher
            .register(id, CancellationToken::new(), Arc::new(Notify::new()))
            .unwrap();

        assert!(dispatcher.dispatch(id, &scope).await.unwrap().is_empty());
        assert_eq!(dispatcher.dispatch_count(), 0);

        scope.enqueue(&BatchKey::new("echo", "a")).unwrap();
        scope.enqueue(&BatchKey::new("echo", "b")).unwrap();
        let resolved = dispatcher.dispatch(id, &scope).await.unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(dispatcher.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn test_resume_wakes_registered_executions() {
        let dispatcher = Arc::new(SharedBatchDispatcher::default());
        let wake = Arc::new(Notify::new());
        dispatcher
            .register(ExecutionId::new(), CancellationToken::new(), wake.clone())
            .unwrap();

        {
            let _outer = SuspendGuard::new(dispatcher.clone());
            let _inner = SuspendGuard::new(dispatcher.clone());
            assert!(dispatcher.is_suspended());
        }
        assert!(!dispatcher.is_suspended());

        // The stored permit completes immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), wake.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_unmatched_resume_is_ignored() {
        let dispatcher = SharedBatchDispatcher::default();
        dispatcher.resume();
        assert!(!dispatcher.is_suspended());

        dispatcher.suspend();
        assert!(dispatcher.is_suspended());
        dispatcher.resume();
        assert!(!dispatcher.is_suspended());
    }

    #[tokio::test]
    async fn test_cancelled_execution_is_not_flushed() {
        let dispatcher = SharedBatchDispatcher::default();
        let id = ExecutionId::new();
        let cancel = CancellationToken::new();
        let scope = scope();
        dispatcher
            .register(id, cancel.clone(), Arc::new(Notify::new()))
            .unwrap();
        scope.enqueue(&BatchKey::new("echo", "a")).unwrap();

        cancel.cancel();

        assert!(dispatcher.dispatch(id, &scope).await.unwrap().is_empty());
        assert_eq!(dispatcher.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_abandons_running_fetch() {
        let dispatcher = SharedBatchDispatcher::default();
        let id = ExecutionId::new();
        let cancel = CancellationToken::new();
        let scope = scope();
        dispatcher
            .register(id, cancel.clone(), Arc::new(Notify::new()))
            .unwrap();
        scope.enqueue(&BatchKey::new("hung", "a")).unwrap();

        cancel_after(&cancel, 20);
        let resolved = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            dispatcher.dispatch(id, &scope),
        )
        .await
        .expect("flush did not observe cancellation")
        .unwrap();

        assert!(resolved.is_empty());
        assert!(!scope.has_pending());
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting_for_a_permit() {
        let dispatcher = Arc::new(SharedBatchDispatcher::new(1));
        let busy = ExecutionId::new();
        let busy_scope = Arc::new(scope());
        dispatcher
            .register(busy, CancellationToken::new(), Arc::new(Notify::new()))
            .unwrap();
        busy_scope.enqueue(&BatchKey::new("hung", "a")).unwrap();
        let holder = {
            let dispatcher = dispatcher.clone();
            let busy_scope = busy_scope.clone();
            tokio::spawn(async move { dispatcher.dispatch(busy, &busy_scope).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let id = ExecutionId::new();
        let cancel = CancellationToken::new();
        let scope = scope();
        dispatcher
            .register(id, cancel.clone(), Arc::new(Notify::new()))
            .unwrap();
        scope.enqueue(&BatchKey::new("echo", "b")).unwrap();

        cancel_after(&cancel, 20);
        let resolved = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            dispatcher.dispatch(id, &scope),
        )
        .await
        .expect("permit wait did not observe cancellation")
        .unwrap();

        assert!(resolved.is_empty());
        assert_eq!(dispatcher.dispatch_count(), 1);
        holder.abort();
    }
}
