// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Batched data fetching
//!
//! This module provides the N+1 avoidance layer:
//! - Batch loaders that fetch many keys with one call
//! - A per-execution scope collecting pending keys and fetched values
//! - A dispatcher shared across requests that flushes at quiescence
//! - A no-op dispatcher that loads every key immediately

pub mod dispatcher;
pub mod loader;
pub mod noop;

pub use dispatcher::{BatchDispatcher, SharedBatchDispatcher, SuspendGuard};
pub use loader::{BatchKey, BatchLoader, BatchScope, LoaderRegistry, PendingBatch};
pub use noop::NoopBatchDispatcher;
