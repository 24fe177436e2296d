// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deferred execution and incremental delivery
//!
//! Work registered here runs only after the primary response is complete.
//! Each finished unit becomes one element of the incremental result stream,
//! emitted in completion order.

pub mod backlog;
pub mod scheduler;

pub use backlog::{DeferredEntry, DeferredWorkBacklog};
pub use scheduler::DeferredWorkScheduler;

use crate::exec::error::FieldError;
use crate::result::ResponsePath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Identifier of a deferred unit; `ROOT` stands for the primary response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeferredTaskId(u64);

impl DeferredTaskId {
    pub const ROOT: DeferredTaskId = DeferredTaskId(0);

    pub fn new(id: u64) -> Self {
        DeferredTaskId(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DeferredTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deferred_{}", self.0)
    }
}

/// How deferred units are run once the primary response is out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferredMode {
    /// Run every available unit in the background and buffer the results
    #[default]
    Eager,
    /// Run one unit at a time, only when the consumer asks for the next result
    OnDemand,
}

/// Partial data produced by one deferred unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeferredPayload {
    pub data: Option<Value>,
    pub errors: Vec<FieldError>,
}

/// A completed deferred unit, ready for the consumer to merge
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredResult {
    pub task_id: DeferredTaskId,
    pub parent_task_id: DeferredTaskId,
    pub label: Option<String>,
    pub path: ResponsePath,
    pub payload: DeferredPayload,
}

/// Work postponed until after the primary response
#[async_trait]
pub trait DeferredExecutionTask: Send + Sync {
    fn label(&self) -> Option<&str> {
        None
    }

    /// Where the payload attaches in the previously emitted tree
    fn path(&self) -> ResponsePath;

    /// Produce the payload; nested deferred work is registered with `id` as parent
    async fn execute(
        &self,
        id: DeferredTaskId,
        deferred: &Arc<DeferredWorkScheduler>,
    ) -> DeferredPayload;
}
