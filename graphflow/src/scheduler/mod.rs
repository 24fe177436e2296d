// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Request-scoped work scheduling
//!
//! This module provides:
//! - The task model shared by every schedulable unit
//! - Parallel and serial work queues with running counters
//! - Dependency-aware admission of newly registered tasks
//! - The work scheduler driving one request to completion

pub mod queue;
pub mod state;
pub mod stats;
pub mod task;
pub mod work_scheduler;

pub use queue::{QueueOrder, WorkQueue};
pub use state::{Admission, TaskStateMachine};
pub use stats::TaskStatistics;
pub use task::{Dependency, ExecutionKind, ExecutionTask, TaskId, TaskRef};
pub use work_scheduler::WorkScheduler;
