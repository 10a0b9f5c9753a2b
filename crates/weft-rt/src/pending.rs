// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pending external computations.
//!
//! A `Pending` settles exactly once, with a value or a failure. The
//! matching `Settler` is consumed by settling, so a second settlement is
//! unrepresentable. Dropping an unsettled `Settler` rejects the pending with
//! `TaskError::Abandoned`.
//!
//! Both halves are `Send + Sync`: a settlement may happen on any thread and
//! reaches the scheduler through the waker it registered.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Waker;

use serde_json::Value;

use crate::error::TaskError;

/// Settled result of a pending computation.
pub type Settlement = Result<Value, TaskError>;

struct Shared {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    settled: Option<Settlement>,
    watchers: Vec<Waker>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, result: Settlement) {
        let watchers = {
            let mut state = self.lock();
            if state.settled.is_some() {
                return;
            }
            state.settled = Some(result);
            std::mem::take(&mut state.watchers)
        };
        for waker in watchers {
            waker.wake();
        }
    }
}

/// Read side of a pending computation. Cheap to clone; every clone observes
/// the same settlement.
#[derive(Clone)]
pub struct Pending {
    shared: Arc<Shared>,
}

/// Write side of a pending computation.
pub struct Settler {
    shared: Option<Arc<Shared>>,
}

/// Create an unsettled pending computation and its settler.
pub fn pending() -> (Pending, Settler) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
    });
    (
        Pending {
            shared: shared.clone(),
        },
        Settler {
            shared: Some(shared),
        },
    )
}

impl Pending {
    fn settled_with(result: Settlement) -> Self {
        let (pending, settler) = pending();
        settler.settle(result);
        pending
    }

    /// A pending computation that has already succeeded.
    ///
    /// Waiting on it is still a suspension point; only `Source::Ready`
    /// resumes in the same tick.
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self::settled_with(Ok(value.into()))
    }

    /// A pending computation that has already failed with `reason`.
    pub fn rejected(reason: impl Into<Value>) -> Self {
        Self::settled_with(Err(TaskError::Rejected(reason.into())))
    }

    pub fn is_settled(&self) -> bool {
        self.shared.lock().settled.is_some()
    }

    /// The settlement, if there is one yet.
    pub fn peek(&self) -> Option<Settlement> {
        self.shared.lock().settled.clone()
    }

    /// Wake `waker` once this pending settles (immediately if it already has).
    pub(crate) fn watch(&self, waker: Waker) {
        let mut state = self.shared.lock();
        if state.settled.is_some() {
            drop(state);
            waker.wake();
        } else {
            state.watchers.push(waker);
        }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("settled", &self.peek())
            .finish()
    }
}

impl Settler {
    /// Settle with a success value.
    pub fn resolve(self, value: impl Into<Value>) {
        self.settle(Ok(value.into()));
    }

    /// Settle with a failure; waiters see `TaskError::Rejected(reason)`.
    pub fn reject(self, reason: impl Into<Value>) {
        self.settle(Err(TaskError::Rejected(reason.into())));
    }

    /// Settle with an arbitrary result. Used for fork results, where the
    /// fork's own error is forwarded unchanged.
    pub fn settle(mut self, result: Settlement) {
        if let Some(shared) = self.shared.take() {
            shared.settle(result);
        }
    }
}

impl Drop for Settler {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.settle(Err(TaskError::Abandoned));
        }
    }
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("armed", &self.shared.is_some())
            .finish()
    }
}
