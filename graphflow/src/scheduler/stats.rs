// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Task statistics driving completion detection

use crate::exec::error::ExecutionError;
use serde::Serialize;

/// Aggregate task counters of one request
///
/// `all_tasks == new_tasks + running_tasks + completed_tasks` holds after
/// every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStatistics {
    new_tasks: usize,
    running_tasks: usize,
    completed_tasks: usize,
    all_tasks: usize,
    batch_dispatches: usize,
}

impl TaskStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_created(&mut self) {
        self.new_tasks += 1;
        self.all_tasks += 1;
    }

    pub fn task_started(&mut self) -> Result<(), ExecutionError> {
        if self.new_tasks == 0 {
            return Err(ExecutionError::InvariantViolation(
                "task started without being registered".to_string(),
            ));
        }
        self.new_tasks -= 1;
        self.running_tasks += 1;
        Ok(())
    }

    pub fn task_completed(&mut self) -> Result<(), ExecutionError> {
        if self.running_tasks == 0 {
            return Err(ExecutionError::InvariantViolation(
                "running task counter would become negative".to_string(),
            ));
        }
        self.running_tasks -= 1;
        self.completed_tasks += 1;
        Ok(())
    }

    /// Registered tasks that will never start because the request was cancelled
    pub fn tasks_discarded(&mut self, count: usize) -> Result<(), ExecutionError> {
        if count > self.new_tasks {
            return Err(ExecutionError::InvariantViolation(format!(
                "cannot discard {} tasks, only {} are waiting",
                count, self.new_tasks
            )));
        }
        self.new_tasks -= count;
        self.completed_tasks += count;
        Ok(())
    }

    pub fn batch_dispatched(&mut self) {
        self.batch_dispatches += 1;
    }

    pub fn new_tasks(&self) -> usize {
        self.new_tasks
    }

    pub fn running_tasks(&self) -> usize {
        self.running_tasks
    }

    pub fn completed_tasks(&self) -> usize {
        self.completed_tasks
    }

    pub fn all_tasks(&self) -> usize {
        self.all_tasks
    }

    pub fn batch_dispatches(&self) -> usize {
        self.batch_dispatches
    }

    /// Every registered task has completed
    pub fn is_completed(&self) -> bool {
        self.all_tasks == self.completed_tasks
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced(stats: &TaskStatistics) -> bool {
        stats.all_tasks() == stats.new_tasks() + stats.running_tasks() + stats.completed_tasks()
    }

    #[test]
    fn test_transitions_keep_identity() {
        let mut stats = TaskStatistics::new();
        assert!(stats.is_completed());

        stats.task_created();
        stats.task_created();
        assert!(balanced(&stats));
        assert!(!stats.is_completed());

        stats.task_started().unwrap();
        assert!(balanced(&stats));

        stats.task_completed().unwrap();
        assert!(balanced(&stats));
        assert!(!stats.is_completed());

        stats.task_started().unwrap();
        stats.task_completed().unwrap();
        assert!(balanced(&stats));
        assert!(stats.is_completed());
        assert_eq!(stats.all_tasks(), 2);
    }

    #[test]
    fn test_completion_without_start_is_violation() {
        let mut stats = TaskStatistics::new();
        stats.task_created();

        assert!(matches!(
            stats.task_completed(),
            Err(ExecutionError::InvariantViolation(_))
        ));
        assert_eq!(stats.running_tasks(), 0);
    }

    #[test]
    fn test_discard_counts_as_completed() {
        let mut stats = TaskStatistics::new();
        stats.task_created();
        stats.task_created();

        stats.tasks_discarded(2).unwrap();

        assert!(stats.is_completed());
        assert!(balanced(&stats));
        assert!(stats.tasks_discarded(1).is_err());
    }
}
