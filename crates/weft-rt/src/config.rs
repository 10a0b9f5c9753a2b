// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.
//!
//! Every field has a default, so a partial JSON object (or `{}`) loads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time source for `sleep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Deterministic: idle time jumps straight to the next deadline.
    #[default]
    Virtual,
    /// Wall clock.
    Real,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub clock: ClockMode,
    /// Longest the scheduler blocks waiting for an external wakeup before
    /// reporting a stall. `None` waits as long as a wakeup is possible.
    pub stall_timeout_ms: Option<u64>,
}

/// A runtime config that failed to parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid runtime config: {0}")]
pub struct ConfigError(#[from] serde_json::Error);

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }
}
