// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Root entry point.
//!
//! Every run builds its own scheduler, so independent invocations never
//! share mailboxes, timers or task ids.

use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::outcome::Outcome;
use crate::sched::scheduler::Scheduler;
use crate::task::Task;

#[derive(Debug, Clone, Default)]
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn run(&self, task: Task) -> Outcome {
        self.run_with_input(task, Value::Null)
    }

    /// Run `task` with `input` available through `Cx::input`.
    pub fn run_with_input(&self, task: Task, input: Value) -> Outcome {
        Scheduler::new(&self.config).run(task, input)
    }
}

/// Run `task` on a default runtime (virtual clock, no stall timeout).
pub fn run(task: Task) -> Outcome {
    Runtime::default().run(task)
}
