// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Dependency-aware task admission
//!
//! A task is admitted once at registration. If its dependency is not yet
//! satisfied it is parked under that exact condition and released only when
//! the condition changes; suspended tasks are never polled.

use super::task::{Dependency, TaskId, TaskRef};
use crate::batch::BatchKey;
use std::collections::{HashMap, HashSet};

/// Outcome of admitting a newly registered task
#[derive(Debug)]
pub enum Admission {
    Runnable(TaskRef),
    Suspended,
}

#[derive(Debug, Default)]
pub struct TaskStateMachine {
    completed: HashSet<TaskId>,
    resolved: HashSet<BatchKey>,
    suspended: HashMap<Dependency, Vec<TaskRef>>,
    suspended_count: usize,
}

impl TaskStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_satisfied(&self, dependency: &Dependency) -> bool {
        match dependency {
            Dependency::Task(id) => self.completed.contains(id),
            Dependency::Batch(key) => self.resolved.contains(key),
        }
    }

    pub fn admit(&mut self, task: TaskRef) -> Admission {
        match task.dependency() {
            Some(dependency) if !self.is_satisfied(&dependency) => {
                log::trace!("Suspending {} until {:?}", task.id(), dependency);
                self.suspended.entry(dependency).or_default().push(task);
                self.suspended_count += 1;
                Admission::Suspended
            }
            _ => Admission::Runnable(task),
        }
    }

    /// Record a completed task and release everything waiting on it
    pub fn task_completed(&mut self, id: TaskId) -> Vec<TaskRef> {
        self.completed.insert(id);
        self.release(&Dependency::Task(id))
    }

    /// Record a fetched batch key and release everything waiting on it
    pub fn batch_resolved(&mut self, key: BatchKey) -> Vec<TaskRef> {
        let dependency = Dependency::Batch(key.clone());
        self.resolved.insert(key);
        self.release(&dependency)
    }

    fn release(&mut self, dependency: &Dependency) -> Vec<TaskRef> {
        let released = self.suspended.remove(dependency).unwrap_or_default();
        self.suspended_count -= released.len();
        released
    }

    /// Remove every suspended task, returning how many were dropped
    pub fn drain_suspended(&mut self) -> usize {
        let dropped = self.suspended_count;
        self.suspended.clear();
        self.suspended_count = 0;
        dropped
    }

    pub fn has_suspended(&self) -> bool {
        self.suspended_count > 0
    }

    pub fn suspended_count(&self) -> usize {
        self.suspended_count
    }

    pub fn clear(&mut self) {
        self.completed.clear();
        self.resolved.clear();
        self.suspended.clear();
        self.suspended_count = 0;
    }
}
