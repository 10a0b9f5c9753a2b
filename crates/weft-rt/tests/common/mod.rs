// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared helpers for integration tests.

use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Install a subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mail as plain strings, for readable assertions.
#[allow(dead_code)]
pub fn strings(mail: &[Value]) -> Vec<String> {
    mail.iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}
