// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Work queues for the parallel and serial lanes

use super::task::TaskRef;
use crate::exec::error::ExecutionError;

/// Pop order of a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrder {
    /// Most recently pushed task first
    Lifo,
    /// Lowest ordinal first, registration sequence breaks ties
    Ordinal,
}

#[derive(Debug)]
struct QueueEntry {
    task: TaskRef,
    sequence: u64,
}

/// Stack of runnable tasks plus the number of popped, unfinished tasks
#[derive(Debug)]
pub struct WorkQueue {
    order: QueueOrder,
    stack: Vec<QueueEntry>,
    running: usize,
}

impl WorkQueue {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            order,
            stack: Vec::new(),
            running: 0,
        }
    }

    pub fn push(&mut self, task: TaskRef, sequence: u64) {
        self.stack.push(QueueEntry { task, sequence });
    }

    /// Take the next task and count it as running
    pub fn pop(&mut self) -> Option<TaskRef> {
        let entry = match self.order {
            QueueOrder::Lifo => self.stack.pop(),
            QueueOrder::Ordinal => {
                let index = self
                    .stack
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, entry)| (entry.task.ordinal(), entry.sequence))
                    .map(|(index, _)| index)?;
                Some(self.stack.remove(index))
            }
        }?;
        self.running += 1;
        Some(entry.task)
    }

    /// Record that a popped task finished
    pub fn mark_completed(&mut self) -> Result<(), ExecutionError> {
        if self.running == 0 {
            return Err(ExecutionError::InvariantViolation(
                "work queue running counter would become negative".to_string(),
            ));
        }
        self.running -= 1;
        Ok(())
    }

    /// Drop every queued task, returning how many were discarded
    pub fn drain(&mut self) -> usize {
        let discarded = self.stack.len();
        self.stack.clear();
        discarded
    }

    /// True when no task is waiting; popped tasks may still be running
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// True when nothing is waiting and nothing is running
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty() && self.running == 0
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.running = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{ExecutionTask, TaskId};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Noop {
        id: u64,
        ordinal: usize,
    }

    #[async_trait]
    impl ExecutionTask for Noop {
        fn id(&self) -> TaskId {
            TaskId::new(self.id)
        }

        fn ordinal(&self) -> usize {
            self.ordinal
        }

        async fn execute(&self) {}
    }

    fn task(id: u64, ordinal: usize) -> TaskRef {
        Arc::new(Noop { id, ordinal })
    }

    #[test]
    fn test_lifo_order() {
        let mut queue = WorkQueue::new(QueueOrder::Lifo);
        queue.push(task(1, 0), 0);
        queue.push(task(2, 0), 1);

        assert_eq!(queue.pop().unwrap().id(), TaskId::new(2));
        assert_eq!(queue.pop().unwrap().id(), TaskId::new(1));
        assert_eq!(queue.running(), 2);
        assert!(queue.is_empty());
        assert!(!queue.is_idle());
    }

    #[test]
    fn test_ordinal_order_ignores_push_order() {
        let mut queue = WorkQueue::new(QueueOrder::Ordinal);
        queue.push(task(3, 2), 0);
        queue.push(task(1, 0), 1);
        queue.push(task(2, 1), 2);

        let popped: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.id().id())
            .collect();
        assert_eq!(popped, vec![1, 2, 3]);
    }

    #[test]
    fn test_running_never_negative() {
        let mut queue = WorkQueue::new(QueueOrder::Lifo);
        assert!(matches!(
            queue.mark_completed(),
            Err(ExecutionError::InvariantViolation(_))
        ));

        queue.push(task(1, 0), 0);
        queue.pop();
        assert!(queue.mark_completed().is_ok());
        assert!(queue.mark_completed().is_err());
        assert_eq!(queue.running(), 0);
        assert!(queue.is_idle());
    }
}
