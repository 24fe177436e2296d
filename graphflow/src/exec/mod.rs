// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Operation execution
//!
//! This module ties the scheduler, batching, deferred delivery and the
//! pooled result tree together:
//! - Request and phase contexts
//! - Resolver tasks and value completion
//! - Query and mutation executors behind `OperationExecutor`

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod response;
pub mod transaction;

mod completion;
mod deferred;
mod task;

pub use config::ExecutorConfig;
pub use context::{ExecutionId, ExecutorServices, RequestContext};
pub use error::{ExecutionError, FieldError};
pub use executor::{ExecutionRequest, MutationExecutor, OperationExecutor, QueryExecutor};
pub use resolver::{DefaultErrorHandler, ErrorHandler, FieldContext, FnResolver, Resolved, Resolver};
pub use response::{ExecutionResult, QueryResult};
pub use transaction::{
    NoopTransactionScope, NoopTransactionScopeHandler, TransactionScope, TransactionScopeHandler,
};
