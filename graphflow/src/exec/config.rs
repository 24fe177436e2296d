// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Executor configuration

use super::error::ExecutionError;
use crate::defer::DeferredMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options fixed when an `OperationExecutor` is constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Coalesce loads through the shared dispatcher; false loads each key immediately
    pub enable_batching: bool,

    /// Batch flushes allowed to run at the same time across requests
    pub max_concurrent_dispatches: usize,

    /// Resolve cheap side-effect free leaves inside the parent task
    pub inline_pure_fields: bool,

    /// Slots per pooled result buffer
    pub result_buffer_capacity: usize,

    /// Idle result buffers kept per node kind
    pub max_pooled_buffers: usize,

    /// Idle work schedulers kept for reuse
    pub max_pooled_schedulers: usize,

    /// How deferred fragments are executed after the primary result
    pub deferred_mode: DeferredMode,

    /// Cancel the request after this long
    pub execution_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enable_batching: true,
            max_concurrent_dispatches: 16,
            inline_pure_fields: true,
            result_buffer_capacity: 64,
            max_pooled_buffers: 128,
            max_pooled_schedulers: 32,
            deferred_mode: DeferredMode::Eager,
            execution_timeout: None,
        }
    }
}

impl ExecutorConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ExecutionError> {
        serde_json::from_str(json)
            .map_err(|e| ExecutionError::InvalidOperation(format!("invalid executor config: {}", e)))
    }

    pub fn without_batching(mut self) -> Self {
        self.enable_batching = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_deferred_mode(mut self, mode: DeferredMode) -> Self {
        self.deferred_mode = mode;
        self
    }
}
