// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Dispatcher variant that never batches

use super::dispatcher::BatchDispatcher;
use super::loader::BatchScope;
use super::BatchKey;
use crate::exec::context::ExecutionId;
use crate::exec::error::ExecutionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Every load executes immediately; results match the batching dispatcher
#[derive(Debug, Default)]
pub struct NoopBatchDispatcher {
    registrations: Mutex<HashSet<ExecutionId>>,
    suspended: AtomicUsize,
}

impl NoopBatchDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchDispatcher for NoopBatchDispatcher {
    fn register(
        &self,
        execution: ExecutionId,
        _cancel: CancellationToken,
        _wake: Arc<Notify>,
    ) -> Result<(), ExecutionError> {
        if self.registrations.lock().insert(execution) {
            Ok(())
        } else {
            Err(ExecutionError::InvariantViolation(format!(
                "execution {} is already registered with the batch dispatcher",
                execution
            )))
        }
    }

    fn unregister(&self, execution: ExecutionId) -> Result<(), ExecutionError> {
        if self.registrations.lock().remove(&execution) {
            Ok(())
        } else {
            Err(ExecutionError::InvariantViolation(format!(
                "execution {} was not registered with the batch dispatcher",
                execution
            )))
        }
    }

    fn suspend(&self) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        let previous =
            self.suspended
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            log::warn!("Batch dispatcher resumed without a matching suspend");
        }
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    fn is_batching(&self) -> bool {
        false
    }

    async fn dispatch(
        &self,
        _execution: ExecutionId,
        scope: &BatchScope,
    ) -> Result<Vec<BatchKey>, ExecutionError> {
        // Nothing is queued in immediate mode; drain defensively one by one
        let mut resolved = Vec::new();
        for batch in scope.take_pending() {
            resolved.extend(scope.fetch(batch).await);
        }
        Ok(resolved)
    }

    fn dispatch_count(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::dispatcher::SuspendGuard;

    #[test]
    fn test_unmatched_resume_keeps_count_at_zero() {
        let dispatcher = NoopBatchDispatcher::new();
        dispatcher.resume();
        assert!(!dispatcher.is_suspended());

        dispatcher.suspend();
        assert!(dispatcher.is_suspended());
        dispatcher.resume();
        assert!(!dispatcher.is_suspended());
    }

    #[test]
    fn test_suspend_guards_nest() {
        let dispatcher = Arc::new(NoopBatchDispatcher::new());
        {
            let _outer = SuspendGuard::new(dispatcher.clone());
            {
                let _inner = SuspendGuard::new(dispatcher.clone());
            }
            assert!(dispatcher.is_suspended());
        }
        assert!(!dispatcher.is_suspended());
        assert!(!dispatcher.is_batching());
    }
}
