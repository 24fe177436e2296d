// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction scopes wrapped around mutation execution
//!
//! A scope that is dropped without `complete` is rolled back by its
//! implementation.

use super::context::RequestContext;
use super::error::ExecutionError;

/// One transaction around the root fields of a mutation
pub trait TransactionScope: Send {
    /// Commit; only called when the mutation finished without errors
    fn complete(&mut self) -> Result<(), ExecutionError>;
}

/// Opens a transaction scope for a request
pub trait TransactionScopeHandler: Send + Sync {
    fn create(&self, request: &RequestContext) -> Result<Box<dyn TransactionScope>, ExecutionError>;
}

#[derive(Debug, Default)]
pub struct NoopTransactionScope;

impl TransactionScope for NoopTransactionScope {
    fn complete(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopTransactionScopeHandler;

impl TransactionScopeHandler for NoopTransactionScopeHandler {
    fn create(&self, _request: &RequestContext) -> Result<Box<dyn TransactionScope>, ExecutionError> {
        Ok(Box::new(NoopTransactionScope))
    }
}
