// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! GraphFlow - A request-scoped execution core for field-graph queries
//!
//! GraphFlow takes a compiled selection tree (a GraphQL-style query plan) and
//! drives the concurrent evaluation of per-field resolvers, materialises their
//! results into a pooled response tree and streams deferred fragments after
//! the primary response.
//!
//! # Features
//!
//! - **Work Scheduler**: LIFO parallel lane, document-ordered serial lane,
//!   dependency-aware task admission
//! - **Batch Dispatching**: coalesces data fetches at scheduler quiescence
//! - **Deferred Delivery**: incremental result stream in completion order
//! - **Pooled Results**: result buffers rented per request and returned as a
//!   batch when the request's memory owner is disposed
//!
//! # Usage
//!
//! ```ignore
//! let executor = OperationExecutor::new(ExecutorConfig::default())
//!     .with_loader(Arc::new(UserLoader::new()));
//!
//! let result = executor
//!     .execute(ExecutionRequest::new(operation).with_root_value(root))
//!     .await?;
//! ```

pub mod batch;
pub mod defer;
pub mod exec;
pub mod plan;
pub mod result;
pub mod scheduler;

// Re-export the public API
pub use batch::{BatchDispatcher, BatchKey, BatchLoader, NoopBatchDispatcher, SharedBatchDispatcher};
pub use defer::{DeferredMode, DeferredTaskId, DeferredWorkScheduler};
pub use exec::{
    ExecutionError, ExecutionRequest, ExecutionResult, ExecutorConfig, FieldContext, FieldError,
    OperationExecutor, QueryResult, Resolved, Resolver,
};
pub use plan::{ExecutionStrategy, FieldType, LeafType, Operation, OperationKind, Selection, SelectionSet};
pub use result::{ResponsePath, ResultBuilder, ResultPool};
pub use scheduler::{ExecutionKind, ExecutionTask, TaskId, WorkScheduler};

/// GraphFlow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GraphFlow crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
