// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Instruction model.
//!
//! Tasks never touch the scheduler directly. Every effect is described by
//! an `Instruction` value that the driver interprets.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};

use crate::pending::Pending;
use crate::task::Task;

/// What a `wait` waits on.
#[derive(Debug, Clone)]
pub enum Source {
    /// A result that is already available. Resumes in the same tick.
    Ready(Value),
    /// A computation that settles later. Always a suspension point.
    Pending(Pending),
}

impl From<Value> for Source {
    fn from(v: Value) -> Self {
        Source::Ready(v)
    }
}

impl From<Pending> for Source {
    fn from(p: Pending) -> Self {
        Source::Pending(p)
    }
}

impl From<&Pending> for Source {
    fn from(p: &Pending) -> Self {
        Source::Pending(p.clone())
    }
}

macro_rules! ready_source_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Source {
            fn from(v: $ty) -> Self {
                Source::Ready(Value::from(v))
            }
        })*
    };
}

ready_source_from!(i32, i64, u32, u64, f64, bool, String, &str);

/// An effect descriptor issued by a task.
pub enum Instruction {
    Wait(Source),
    Send(Value),
    Sleep(Duration),
    Spawn(Task),
    Fork(Task),
    Join,
    /// Ask for the calling task's own handle (`self`).
    Introspect,
    /// Yield with no resumption source; an external `TaskRef` holder resumes.
    Suspend,
    /// A descriptor outside the interpreted set. The driver rejects these.
    Foreign { tag: String, payload: Value },
}

impl Instruction {
    pub fn foreign(tag: impl Into<String>, payload: impl Into<Value>) -> Self {
        Instruction::Foreign {
            tag: tag.into(),
            payload: payload.into(),
        }
    }

    /// Boundary tag of this instruction.
    pub fn tag(&self) -> &str {
        match self {
            Instruction::Wait(_) => "wait",
            Instruction::Send(_) => "send",
            Instruction::Sleep(_) => "sleep",
            Instruction::Spawn(_) => "spawn",
            Instruction::Fork(_) => "fork",
            Instruction::Join => "join",
            Instruction::Introspect => "self",
            Instruction::Suspend => "suspend",
            Instruction::Foreign { tag, .. } => tag,
        }
    }

    /// Boundary JSON shape: `{ "type": tag, ...payload }`.
    pub fn describe(&self) -> Value {
        match self {
            Instruction::Wait(Source::Ready(v)) => json!({ "type": "wait", "ready": v }),
            Instruction::Wait(Source::Pending(p)) => {
                json!({ "type": "wait", "pending": true, "settled": p.is_settled() })
            }
            Instruction::Send(message) => json!({ "type": "send", "message": message }),
            Instruction::Sleep(d) => json!({ "type": "sleep", "ms": d.as_millis() as u64 }),
            Instruction::Foreign { tag, payload } => json!({ "type": tag, "payload": payload }),
            other => json!({ "type": other.tag() }),
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction({})", self.describe())
    }
}
