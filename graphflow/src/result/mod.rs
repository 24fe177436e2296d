// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Pooled response tree
//!
//! This module provides the mutable nodes resolvers write into:
//! - Result maps, leaf lists and lists of maps rented from pooled buffers
//! - A per-request memory owner that returns buffers to the pool in one step
//! - A request-scoped builder that serialises concurrent rents and writes

pub mod buffer;
pub mod builder;
pub mod node;
pub mod owner;
pub mod path;
pub mod pool;

pub use buffer::ResultBuffer;
pub use builder::ResultBuilder;
pub use node::{NodeKind, NodeRef, ParentRef, ResultField, ResultList, ResultMap, ResultMapList, ResultValue};
pub use owner::{ResultMemoryOwner, ResultPool};
pub use path::{PathSegment, ResponsePath};
pub use pool::{ObjectPool, Poolable};

use thiserror::Error;

/// Result tree errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResultError {
    #[error("Result node reference is stale or was never rented by this request")]
    StaleReference,

    #[error("Result node kind mismatch: expected {expected:?}, found {actual:?}")]
    KindMismatch { expected: NodeKind, actual: NodeKind },

    #[error("Result slot {0} is out of range")]
    SlotOutOfRange(usize),

    #[error("Result memory has already been released")]
    Sealed,
}
