// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Append-only message log for one root invocation.
//!
//! Only the driver appends, through `&mut Mailbox`, one send at a time, so
//! append order is interpretation order.

use serde::Serialize;
use serde_json::Value;

use crate::task::TaskId;

/// One recorded send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub from: TaskId,
    pub message: Value,
}

#[derive(Debug, Default)]
pub struct Mailbox {
    entries: Vec<Envelope>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, from: TaskId, message: Value) {
        tracing::trace!(task = %from, %message, seq = self.entries.len(), "mail recorded");
        self.entries.push(Envelope { from, message });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn envelopes(&self) -> &[Envelope] {
        &self.entries
    }

    /// Messages sent by one task, in the order it sent them.
    pub fn sent_by(&self, task: TaskId) -> impl Iterator<Item = &Value> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.from == task)
            .map(|e| &e.message)
    }

    /// Close the log and hand out the messages in recorded order.
    pub fn freeze(self) -> Vec<Value> {
        self.entries.into_iter().map(|e| e.message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_interpretation_order() {
        let mut mailbox = Mailbox::new();
        mailbox.record(TaskId(0), json!("one"));
        mailbox.record(TaskId(1), json!("c1"));
        mailbox.record(TaskId(0), json!("two"));

        assert_eq!(mailbox.len(), 3);
        let from_root: Vec<_> = mailbox.sent_by(TaskId::ROOT).cloned().collect();
        assert_eq!(from_root, vec![json!("one"), json!("two")]);
        assert_eq!(mailbox.freeze(), vec![json!("one"), json!("c1"), json!("two")]);
    }
}
