// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task abstraction.
//!
//! Task logic is ordinary `async` Rust written against a `Cx`. Each
//! primitive on `Cx` is a future that deposits exactly one `Instruction`
//! into the task's slot on its first poll and returns `Pending`; the driver
//! picks the instruction up, resolves it, writes the resumption back into
//! the slot and polls again. The primitive then completes with either the
//! resumption value or the injected error, at the exact point it was
//! awaited.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::TaskError;
use crate::instruction::{Instruction, Source};
use crate::sched::handle::{ForkHandle, TaskRef};

/// Identifier of a task within one runtime invocation. The root is `#0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub const ROOT: TaskId = TaskId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a suspended task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocker {
    /// A pending computation.
    Pending,
    /// A timer expiring at the given scheduler time.
    Sleep { until: Duration },
    /// Spawned children to reach a terminal state.
    Join,
    /// A `TaskRef` holder outside the scheduler.
    External,
}

/// Task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, never resumed.
    Pending,
    /// Its next resumption is computed and queued.
    Ready,
    /// Being driven.
    Running,
    Suspended(Blocker),
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Value fed back into a task when an instruction resolves.
#[derive(Debug, Clone)]
pub enum Reply {
    Unit,
    Value(Value),
    Task(TaskRef),
    Fork(ForkHandle),
}

impl Reply {
    pub fn into_value(self) -> Value {
        match self {
            Reply::Value(v) => v,
            Reply::Unit | Reply::Task(_) | Reply::Fork(_) => Value::Null,
        }
    }
}

/// A resolved instruction: a reply, or a failure to raise at the
/// suspension point.
pub type Resumption = Result<Reply, TaskError>;

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = Result<Value, TaskError>>>>;

type StartFn = Box<dyn FnOnce(Cx) -> TaskFuture>;

/// A resumable computation that has not started yet.
pub struct Task {
    start: StartFn,
    name: Option<String>,
}

impl Task {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Cx) -> Fut + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + 'static,
    {
        Self {
            start: Box::new(move |cx| Box::pin(f(cx))),
            name: None,
        }
    }

    /// Attach a name that shows up in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn start(self, input: Value) -> (TaskFuture, Rc<RefCell<Slot>>) {
        let slot = Rc::new(RefCell::new(Slot::default()));
        let cx = Cx {
            slot: slot.clone(),
            input: Rc::new(input),
        };
        ((self.start)(cx), slot)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Hand-off point between a task's primitives and its driver.
#[derive(Default)]
pub(crate) struct Slot {
    pub issued: Option<Instruction>,
    /// Set when a second instruction was issued before the first resolved.
    pub overlapped: bool,
    pub reply: Option<Resumption>,
}

/// Task context. Every effect a task performs goes through here.
#[derive(Clone)]
pub struct Cx {
    slot: Rc<RefCell<Slot>>,
    input: Rc<Value>,
}

impl Cx {
    /// The input the task was started with (`Null` when none was given).
    pub fn input(&self) -> Value {
        (*self.input).clone()
    }

    /// Issue any instruction and suspend until the runtime resolves it.
    pub fn perform(&self, instruction: Instruction) -> Effect {
        Effect {
            slot: self.slot.clone(),
            instruction: Some(instruction),
        }
    }

    /// Wait for `source`. Available results resume in the same tick; a
    /// pending computation suspends the task until it settles, and its
    /// failure is raised here.
    pub async fn wait(&self, source: impl Into<Source>) -> Result<Value, TaskError> {
        self.perform(Instruction::Wait(source.into()))
            .await
            .map(Reply::into_value)
    }

    /// Append `message` to the mailbox. Never suspends.
    pub async fn send(&self, message: impl Into<Value>) -> Result<(), TaskError> {
        self.perform(Instruction::Send(message.into())).await?;
        Ok(())
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        self.perform(Instruction::Sleep(duration)).await?;
        Ok(())
    }

    /// Start `task` concurrently; it is tracked for the next `join`.
    pub async fn spawn(&self, task: Task) -> Result<TaskRef, TaskError> {
        match self.perform(Instruction::Spawn(task)).await? {
            Reply::Task(handle) => Ok(handle),
            _ => Err(TaskError::Unmanaged),
        }
    }

    /// Start `task` concurrently with its failure isolated from this task.
    pub async fn fork(&self, task: Task) -> Result<ForkHandle, TaskError> {
        match self.perform(Instruction::Fork(task)).await? {
            Reply::Fork(handle) => Ok(handle),
            _ => Err(TaskError::Unmanaged),
        }
    }

    /// Wait for every task spawned so far. Raises the first failure.
    pub async fn join(&self) -> Result<(), TaskError> {
        self.perform(Instruction::Join).await?;
        Ok(())
    }

    /// This task's own handle.
    pub async fn current(&self) -> Result<TaskRef, TaskError> {
        match self.perform(Instruction::Introspect).await? {
            Reply::Task(handle) => Ok(handle),
            _ => Err(TaskError::Unmanaged),
        }
    }

    /// Park until a `TaskRef` holder resumes or throws into this task.
    pub async fn suspend(&self) -> Result<Value, TaskError> {
        self.perform(Instruction::Suspend)
            .await
            .map(Reply::into_value)
    }
}

/// Future for a single instruction.
pub struct Effect {
    slot: Rc<RefCell<Slot>>,
    instruction: Option<Instruction>,
}

impl Future for Effect {
    type Output = Resumption;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Resumption> {
        if let Some(instruction) = self.instruction.take() {
            let mut slot = self.slot.borrow_mut();
            if slot.issued.is_some() {
                slot.overlapped = true;
            } else {
                slot.issued = Some(instruction);
            }
            return Poll::Pending;
        }
        match self.slot.borrow_mut().reply.take() {
            Some(resumption) => Poll::Ready(resumption),
            None => Poll::Pending,
        }
    }
}

/// Run `body`, then always run `cleanup`.
///
/// A cleanup failure replaces whatever `body` produced; otherwise the body's
/// result stands.
pub async fn finally<T, B, C>(body: B, cleanup: C) -> Result<T, TaskError>
where
    B: Future<Output = Result<T, TaskError>>,
    C: Future<Output = Result<(), TaskError>>,
{
    let result = body.await;
    cleanup.await?;
    result
}

/// Run `body`; on failure hand the error to `handler`.
pub async fn catch<T, B, H, HF>(body: B, handler: H) -> Result<T, TaskError>
where
    B: Future<Output = Result<T, TaskError>>,
    H: FnOnce(TaskError) -> HF,
    HF: Future<Output = Result<T, TaskError>>,
{
    match body.await {
        Ok(value) => Ok(value),
        Err(e) => handler(e).await,
    }
}
