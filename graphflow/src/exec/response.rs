// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Response payloads handed back to the transport layer

use super::error::FieldError;
use crate::defer::{DeferredResult, DeferredTaskId};
use crate::result::ResponsePath;
use crate::scheduler::TaskStatistics;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// One response: the primary result or one incremental fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,

    /// Attachment point of an incremental fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<ResponsePath>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Present on stream elements only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,

    #[serde(skip)]
    pub task_id: Option<DeferredTaskId>,

    #[serde(skip)]
    pub parent_task_id: Option<DeferredTaskId>,

    /// Scheduler counters of the primary phase
    #[serde(skip)]
    pub statistics: Option<TaskStatistics>,
}

impl QueryResult {
    pub fn new(data: Option<Value>, errors: Vec<FieldError>) -> Self {
        Self {
            data,
            errors,
            ..Default::default()
        }
    }

    pub fn from_deferred(result: DeferredResult, has_next: bool) -> Self {
        Self {
            data: result.payload.data,
            errors: result.payload.errors,
            path: Some(result.path),
            label: result.label,
            has_next: Some(has_next),
            task_id: Some(result.task_id),
            parent_task_id: Some(result.parent_task_id),
            statistics: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Serialize into the response wire shape
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Outcome of executing one operation
pub enum ExecutionResult {
    /// No deferred work was registered
    Single(QueryResult),
    /// Primary result followed by deferred fragments in completion order
    Stream(BoxStream<'static, QueryResult>),
}

impl ExecutionResult {
    pub fn is_stream(&self) -> bool {
        matches!(self, ExecutionResult::Stream(_))
    }

    /// The single result, or `None` for a stream
    pub fn into_single(self) -> Option<QueryResult> {
        match self {
            ExecutionResult::Single(result) => Some(result),
            ExecutionResult::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<BoxStream<'static, QueryResult>> {
        match self {
            ExecutionResult::Single(_) => None,
            ExecutionResult::Stream(stream) => Some(stream),
        }
    }
}

impl fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Single(result) => f.debug_tuple("Single").field(result).finish(),
            ExecutionResult::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_errors_are_omitted() {
        let result = QueryResult::new(Some(json!({"a": 1})), Vec::new());
        assert_eq!(result.to_json().unwrap(), json!({"data": {"a": 1}}));

        let failed = QueryResult::new(
            Some(json!({"a": null})),
            vec![FieldError::new("boom").with_path(ResponsePath::root().with_field("a"))],
        );
        assert_eq!(
            failed.to_json().unwrap(),
            json!({"data": {"a": null}, "errors": [{"message": "boom", "path": ["a"]}]})
        );
    }
}
