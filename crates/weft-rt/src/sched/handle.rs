// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task handles.
//!
//! `TaskRef` is the addressable handle `self` resolves to. It can be moved
//! to other tasks or threads and used to drive a task parked on `suspend`.
//! `ForkHandle` additionally carries the fork's eventual result.

use std::fmt;
use std::sync::{Arc, Weak};
use std::task::Wake;

use serde_json::Value;

use crate::error::{ResumeError, TaskError};
use crate::instruction::Source;
use crate::pending::Pending;
use crate::task::TaskId;

use super::queue::{Inbox, Wakeup};

/// Addressable handle to a task.
#[derive(Clone)]
pub struct TaskRef {
    id: TaskId,
    inbox: Weak<Inbox>,
}

impl TaskRef {
    pub(crate) fn new(id: TaskId, inbox: &Arc<Inbox>) -> Self {
        Self {
            id,
            inbox: Arc::downgrade(inbox),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Resume the task with `value` if it is parked on `suspend`.
    ///
    /// The request is queued; a task that is not parked on `suspend` when
    /// the scheduler picks it up ignores it.
    pub fn resume(&self, value: impl Into<Value>) -> Result<(), ResumeError> {
        self.post(Ok(value.into()))
    }

    /// Raise `error` inside the task at its `suspend` point.
    pub fn throw(&self, error: TaskError) -> Result<(), ResumeError> {
        self.post(Err(error))
    }

    fn post(&self, resumption: Result<Value, TaskError>) -> Result<(), ResumeError> {
        let inbox = self
            .inbox
            .upgrade()
            .ok_or(ResumeError::RuntimeGone(self.id))?;
        inbox.push(Wakeup::Resume {
            task: self.id,
            resumption,
        });
        Ok(())
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.inbox, &other.inbox)
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskRef").field(&self.id).finish()
    }
}

/// Handle to a forked task and its eventual result.
#[derive(Clone, Debug)]
pub struct ForkHandle {
    task: TaskRef,
    result: Pending,
}

impl ForkHandle {
    pub(crate) fn new(task: TaskRef, result: Pending) -> Self {
        Self { task, result }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    /// The fork's result as a waitable source. Waiting on it raises the
    /// fork's failure in the waiter; not waiting keeps it isolated.
    pub fn result(&self) -> Source {
        Source::Pending(self.result.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_settled()
    }
}

/// Waker registered on a pending computation. Posts a `Settled` wakeup
/// tagged with the suspension epoch it was registered for.
pub(crate) struct SettleWaker {
    task: TaskId,
    epoch: u64,
    inbox: Weak<Inbox>,
}

impl SettleWaker {
    pub fn new(task: TaskId, epoch: u64, inbox: &Arc<Inbox>) -> Self {
        Self {
            task,
            epoch,
            inbox: Arc::downgrade(inbox),
        }
    }
}

impl Wake for SettleWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        // Runtime already torn down: nobody left to resume.
        if let Some(inbox) = self.inbox.upgrade() {
            inbox.push(Wakeup::Settled {
                task: self.task,
                epoch: self.epoch,
            });
        }
    }
}
