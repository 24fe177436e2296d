//! Test utilities for GraphFlow integration tests
//!
//! The fixture wraps an `OperationExecutor` and provides resolvers, loaders
//! and transaction handlers that record what the executor did with them.

#![allow(dead_code)]

pub mod fixture;
