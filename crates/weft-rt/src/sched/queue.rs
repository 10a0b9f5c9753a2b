// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler queues.
//!
//! - `ReadyQueue`: FIFO of tasks whose next resumption is computed.
//! - `TimerHeap`: sleeping tasks ordered by deadline, then by insertion.
//! - `Inbox`: wakeups posted from outside the interpretation loop (settling
//!   pendings, `TaskRef` resumes). The only piece touched from other threads.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::TaskError;
use crate::task::{Resumption, TaskId};

/// Tasks ready to run, in the order they became ready.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    queue: VecDeque<(TaskId, Resumption)>,
}

impl ReadyQueue {
    pub fn push(&mut self, task: TaskId, resumption: Resumption) {
        self.queue.push_back((task, resumption));
    }

    pub fn pop(&mut self) -> Option<(TaskId, Resumption)> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TimerEntry {
    deadline: Duration,
    seq: u64,
    task: TaskId,
    epoch: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, earliest deadline must pop first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of sleep deadlines. `epoch` identifies which suspension of the
/// task the timer belongs to.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    pub fn insert(&mut self, task: TaskId, epoch: u64, deadline: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            task,
            epoch,
        });
    }

    pub fn peek_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Remove every timer with `deadline <= now`, earliest first.
    pub fn pop_expired(&mut self, now: Duration) -> Vec<(TaskId, u64)> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push((entry.task, entry.epoch));
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

/// A wakeup posted into the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Wakeup {
    /// The pending computation a task waits on settled.
    Settled { task: TaskId, epoch: u64 },
    /// A `TaskRef` holder resumed a suspended task.
    Resume {
        task: TaskId,
        resumption: Result<Value, TaskError>,
    },
}

/// Cross-thread wakeup queue with a condvar for the idle scheduler.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    queue: Mutex<VecDeque<Wakeup>>,
    signal: Condvar,
}

impl Inbox {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Wakeup>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, wakeup: Wakeup) {
        self.lock().push_back(wakeup);
        self.signal.notify_one();
    }

    pub fn drain(&self) -> Vec<Wakeup> {
        self.lock().drain(..).collect()
    }

    /// Block until a wakeup is queued or `timeout` passes. `None`, or a
    /// timeout past what `Instant` can represent, waits indefinitely.
    /// Returns whether anything is queued.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut queue = self.lock();
        while queue.is_empty() {
            match deadline {
                None => {
                    queue = self
                        .signal
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    queue = self
                        .signal
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }
}
