// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-task interpreter.
//!
//! The driver resumes one task, interprets each instruction it issues, and
//! keeps going in the same tick until the task either finishes or reaches a
//! suspension point. Cross-task concerns (spawning, `self`, `suspend`) are
//! delegated to a `Host`; suspension points are handed back to the caller.

use std::cell::RefCell;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use serde_json::Value;

use crate::error::TaskError;
use crate::instruction::{Instruction, Source};
use crate::mailbox::Mailbox;
use crate::pending::Pending;
use crate::task::{Reply, Resumption, Slot, Task, TaskFuture, TaskId};

/// How a child relates to the task that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Root,
    /// Tracked for `join`.
    Spawned,
    /// Failure isolated from the parent.
    Forked,
}

/// Resolution of an escalated instruction.
#[derive(Debug)]
pub enum Escalation {
    Resume(Resumption),
    /// No resumption source; the task stays parked.
    Park,
}

/// The outer context a driver runs in.
pub trait Host {
    /// Register `task` as a child of `parent` and return what the parent
    /// is resumed with.
    fn spawn(&mut self, parent: TaskId, task: Task, kind: ChildKind) -> Reply;

    /// Resolve an instruction the driver passes through (`self`, `suspend`).
    fn escalate(&mut self, from: TaskId, instruction: Instruction) -> Escalation;
}

/// A suspension point reached by the task.
#[derive(Debug)]
pub enum Blocked {
    Pending(Pending),
    Sleep(Duration),
    Join,
    External,
}

/// Result of one `drive` call.
#[derive(Debug)]
pub enum Yield {
    Finished(Result<Value, TaskError>),
    Blocked(Blocked),
}

enum Stage {
    Unstarted { task: Task, input: Value },
    Live { future: TaskFuture, slot: Rc<RefCell<Slot>> },
    Done,
}

enum Step {
    Issued(Instruction),
    Finished(Result<Value, TaskError>),
}

pub struct Driver {
    id: TaskId,
    stage: Stage,
    /// Failure the task cannot recover from; reported once it unwinds.
    fatal: Option<TaskError>,
}

impl Driver {
    pub fn new(id: TaskId, task: Task, input: Value) -> Self {
        Self {
            id,
            stage: Stage::Unstarted { task, input },
            fatal: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_done(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    /// Resume the task with `input` and interpret until it finishes or
    /// blocks. The first call starts the task and ignores `input`.
    pub fn drive(&mut self, input: Resumption, mailbox: &mut Mailbox, host: &mut dyn Host) -> Yield {
        let mut input = input;
        loop {
            let instruction = match self.step(input) {
                Step::Issued(instruction) => instruction,
                Step::Finished(result) => return Yield::Finished(self.conclude(result)),
            };
            tracing::trace!(task = %self.id, instruction = %instruction.describe(), "interpret");

            input = match instruction {
                Instruction::Send(message) => {
                    mailbox.record(self.id, message);
                    Ok(Reply::Unit)
                }
                Instruction::Wait(Source::Ready(value)) => Ok(Reply::Value(value)),
                Instruction::Wait(Source::Pending(pending)) => {
                    return Yield::Blocked(Blocked::Pending(pending));
                }
                Instruction::Sleep(duration) => return Yield::Blocked(Blocked::Sleep(duration)),
                Instruction::Join => return Yield::Blocked(Blocked::Join),
                Instruction::Spawn(task) => Ok(host.spawn(self.id, task, ChildKind::Spawned)),
                Instruction::Fork(task) => Ok(host.spawn(self.id, task, ChildKind::Forked)),
                escalated @ (Instruction::Introspect | Instruction::Suspend) => {
                    match host.escalate(self.id, escalated) {
                        Escalation::Resume(resumption) => resumption,
                        Escalation::Park => return Yield::Blocked(Blocked::External),
                    }
                }
                Instruction::Foreign { tag, .. } => {
                    let error = TaskError::UnknownInstruction(tag);
                    tracing::debug!(task = %self.id, %error, "unwinding");
                    self.fatal.get_or_insert_with(|| error.clone());
                    Err(error)
                }
            };
        }
    }

    /// Final result once the task is terminal. A latched fatal error wins
    /// over whatever the task returned, unless its cleanup failed with a
    /// different error.
    fn conclude(&mut self, result: Result<Value, TaskError>) -> Result<Value, TaskError> {
        match (self.fatal.take(), result) {
            (Some(fatal), Err(error)) if error != fatal => Err(error),
            (Some(fatal), _) => Err(fatal),
            (None, result) => result,
        }
    }

    /// Resume the future once and collect what it issued.
    fn step(&mut self, input: Resumption) -> Step {
        let (mut future, slot) = match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Unstarted { task, input: start } => task.start(start),
            Stage::Live { future, slot } => {
                slot.borrow_mut().reply = Some(input);
                (future, slot)
            }
            Stage::Done => {
                tracing::warn!(task = %self.id, "resumed after reaching a terminal state");
                return Step::Finished(Err(TaskError::Unmanaged));
            }
        };

        let mut cx = Context::from_waker(Waker::noop());
        if let Poll::Ready(result) = future.as_mut().poll(&mut cx) {
            return Step::Finished(result);
        }

        let (issued, overlapped) = {
            let mut slot = slot.borrow_mut();
            (slot.issued.take(), std::mem::take(&mut slot.overlapped))
        };
        match issued {
            Some(instruction) if !overlapped => {
                self.stage = Stage::Live { future, slot };
                Step::Issued(instruction)
            }
            _ => Step::Finished(Err(TaskError::Unmanaged)),
        }
    }
}
