// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Multi-task scheduling.
//!
//! Components:
//! - `queue`     — ready queue, timer heap, cross-thread inbox
//! - `clock`     — virtual or wall-clock time for `sleep`
//! - `handle`    — `TaskRef` / `ForkHandle` and the settle waker
//! - `scheduler` — task table, join bookkeeping, the run loop

pub(crate) mod clock;
pub mod handle;
pub(crate) mod queue;
pub mod scheduler;
