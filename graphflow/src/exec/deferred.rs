// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deferred fragment execution

use super::completion::execute_selection_set;
use super::context::{ExecutionPhase, RequestContext};
use super::error::{ExecutionError, FieldError};
use crate::defer::{DeferredExecutionTask, DeferredPayload, DeferredTaskId, DeferredWorkScheduler};
use crate::plan::DeferredFragment;
use crate::result::ResponsePath;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Runs a deferred fragment against the value it was attached to, on a
/// fresh scheduler, and materialises it as its own result map
pub(crate) struct DeferredFragmentTask {
    request: Weak<RequestContext>,
    fragment: DeferredFragment,
    parent: Arc<Value>,
    path: ResponsePath,
}

impl DeferredFragmentTask {
    pub fn new(
        request: &Arc<RequestContext>,
        fragment: DeferredFragment,
        parent: Arc<Value>,
        path: ResponsePath,
    ) -> Self {
        Self {
            request: Arc::downgrade(request),
            fragment,
            parent,
            path,
        }
    }

    async fn run(
        &self,
        request: &Arc<RequestContext>,
        id: DeferredTaskId,
    ) -> Result<DeferredPayload, ExecutionError> {
        let phase = ExecutionPhase::start(request, id)?;
        let set = self.fragment.selection_set();
        let results = request.results();

        let map = match results.rent_map(set.selections_for(&self.parent).len(), None, true) {
            Ok(map) => map,
            Err(error) => {
                phase.release();
                return Err(error.into());
            }
        };
        execute_selection_set(&phase, map, set, &self.parent, &self.path, false).await?;

        Ok(DeferredPayload {
            data: Some(results.to_json(map)?),
            errors: phase.take_errors(),
        })
    }

    fn failure(&self, message: String) -> DeferredPayload {
        DeferredPayload {
            data: None,
            errors: vec![FieldError::new(message).with_path(self.path.clone())],
        }
    }
}

#[async_trait]
impl DeferredExecutionTask for DeferredFragmentTask {
    fn label(&self) -> Option<&str> {
        self.fragment.label()
    }

    fn path(&self) -> ResponsePath {
        self.path.clone()
    }

    async fn execute(
        &self,
        id: DeferredTaskId,
        _deferred: &Arc<DeferredWorkScheduler>,
    ) -> DeferredPayload {
        let Some(request) = self.request.upgrade() else {
            return self.failure("Request finished before the deferred fragment ran".to_string());
        };
        log::debug!("Running {} at {}", id, self.path);
        match self.run(&request, id).await {
            Ok(payload) => payload,
            Err(error) => self.failure(error.to_string()),
        }
    }
}
