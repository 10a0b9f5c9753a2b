// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Weft task-effect runtime.
//!
//! Tasks are `async` computations that never touch concurrency or I/O
//! directly. They issue instructions (`wait`, `send`, `sleep`, `spawn`,
//! `fork`, `join`, `self`, `suspend`) through their `Cx`; a per-task driver
//! interprets them and a per-invocation scheduler interleaves the task tree
//! cooperatively. A run ends in an `Outcome`: the root's value or error plus
//! the ordered mail every task in the tree sent.
//!
//! Components:
//! - instruction — effect descriptors
//! - task        — task context, primitives, `finally` / `catch`
//! - pending     — one-shot external computations
//! - mailbox     — append-only message log
//! - driver      — single-task interpreter
//! - sched       — ready queue, timers, joins, handles
//! - runtime     — root entry point

pub mod config;
pub mod driver;
pub mod error;
pub mod instruction;
pub mod mailbox;
pub mod outcome;
pub mod pending;
pub mod runtime;
pub mod sched;
pub mod task;

pub use config::{ClockMode, ConfigError, RuntimeConfig};
pub use error::{ResumeError, TaskError};
pub use instruction::{Instruction, Source};
pub use outcome::Outcome;
pub use pending::{pending, Pending, Settler};
pub use runtime::{run, Runtime};
pub use sched::handle::{ForkHandle, TaskRef};
pub use task::{catch, finally, Cx, Task, TaskId, TaskState};
