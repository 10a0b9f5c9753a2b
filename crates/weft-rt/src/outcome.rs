// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Terminal result of a root invocation.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::TaskError;

/// Success value or error, plus every message recorded before the root
/// task reached its terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: Result<Value, TaskError>,
    pub mail: Vec<Value>,
}

impl Outcome {
    pub fn new(result: Result<Value, TaskError>, mail: Vec<Value>) -> Self {
        Self { result, mail }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.result.as_ref().err()
    }

    pub fn mail(&self) -> &[Value] {
        &self.mail
    }

    /// Drop the mail and keep the native result.
    pub fn into_result(self) -> Result<Value, TaskError> {
        self.result
    }

    /// Boundary shape: `{ ok, value | error, mail }`.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("ok", &self.is_ok())?;
        match &self.result {
            Ok(value) => map.serialize_entry("value", value)?,
            Err(error) => map.serialize_entry("error", &error.to_value())?,
        }
        map.serialize_entry("mail", &self.mail)?;
        map.end()
    }
}
