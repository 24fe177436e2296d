// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution error types

use crate::result::{ResponsePath, ResultError};
use crate::scheduler::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Request-fatal execution errors
///
/// Field failures never surface here; they become `FieldError`s in the
/// response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Scheduler invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution stalled with {0} suspended tasks")]
    Stalled(usize),

    #[error("Task {0} panicked")]
    TaskPanicked(TaskId),

    /// Raised by a transaction scope that fails to open or commit
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Result error: {0}")]
    Result(#[from] ResultError),

    #[error("Batch error: {0}")]
    Batch(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// A field-local error attached to the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<ResponsePath>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Attach the response path unless the error already carries one
    pub fn with_path(mut self, path: ResponsePath) -> Self {
        if self.path.is_none() {
            self.path = Some(path);
        }
        self
    }

    pub fn with_extensions(mut self, extensions: Value) -> Self {
        self.extensions = Some(extensions);
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} at {}", self.message, path),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for FieldError {}

impl From<ExecutionError> for FieldError {
    fn from(error: ExecutionError) -> Self {
        FieldError::new(error.to_string())
    }
}
