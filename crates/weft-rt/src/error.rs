// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task failures and the errors of the runtime's outer handles.

use serde_json::Value;

use crate::task::TaskId;

/// A failure raised inside a task.
///
/// Every variant travels the same way: it is injected at the suspension
/// point that produced it and surfaces in task logic as an `Err`, where it
/// can be matched, re-raised with `?`, or observed by a `finally` cleanup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// Raised by the task's own logic.
    #[error("{}", display_payload(.0))]
    Thrown(Value),

    /// A pending computation settled with a failure.
    #[error("{}", display_payload(.0))]
    Rejected(Value),

    /// The task issued an instruction the driver has no interpretation for.
    #[error("unknown instruction `{0}`")]
    UnknownInstruction(String),

    /// The task suspended on something other than a runtime instruction.
    #[error("task suspended without issuing an instruction")]
    Unmanaged,

    /// The settler of a pending computation was dropped before settling.
    #[error("pending computation was abandoned before it settled")]
    Abandoned,

    /// No task can make progress.
    #[error("no runnable tasks; {blocked} task{} blocked forever", if *.blocked == 1 { "" } else { "s" })]
    Stalled { blocked: usize },
}

impl TaskError {
    /// Shorthand for a task-logic failure carrying `payload`.
    pub fn thrown(payload: impl Into<Value>) -> Self {
        TaskError::Thrown(payload.into())
    }

    /// Shorthand for a pending-computation failure carrying `payload`.
    pub fn rejected(payload: impl Into<Value>) -> Self {
        TaskError::Rejected(payload.into())
    }

    /// The value carried by a thrown or rejected failure.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            TaskError::Thrown(v) | TaskError::Rejected(v) => Some(v),
            _ => None,
        }
    }

    /// JSON form used at the outcome boundary: the payload itself for
    /// thrown and rejected failures, the message text otherwise.
    pub fn to_value(&self) -> Value {
        match self.payload() {
            Some(v) => v.clone(),
            None => Value::String(self.to_string()),
        }
    }
}

fn display_payload(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Returned by `TaskRef::resume` / `TaskRef::throw`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResumeError {
    /// The runtime that owned the task has already produced its outcome.
    #[error("task {0} belongs to a runtime that has shut down")]
    RuntimeGone(TaskId),
}
