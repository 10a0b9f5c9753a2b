// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative multi-task scheduler.
//!
//! One scheduler per root invocation. It owns the task table, the mailbox,
//! timers and the inbox, and drives every task on the calling thread. Tasks
//! interleave only at suspension points (`wait` on a pending computation,
//! `sleep`, `join`, `suspend`).
//!
//! A tick resumes exactly the tasks that were ready when it started, in
//! FIFO order, each until its next suspension point. Tasks made ready during
//! the tick (spawned children, completed joins) run in the next one.

use std::sync::Arc;
use std::task::Waker;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::driver::{Blocked, ChildKind, Driver, Escalation, Host, Yield};
use crate::error::TaskError;
use crate::instruction::Instruction;
use crate::mailbox::Mailbox;
use crate::outcome::Outcome;
use crate::pending::{pending, Pending, Settler};
use crate::task::{Blocker, Reply, Resumption, Task, TaskId, TaskState};

use super::clock::Clock;
use super::handle::{ForkHandle, SettleWaker, TaskRef};
use super::queue::{Inbox, ReadyQueue, TimerHeap, Wakeup};

/// Spawned children a task is joining on.
#[derive(Debug)]
struct JoinWait {
    members: Vec<TaskId>,
    remaining: usize,
}

struct TaskRecord {
    name: Option<String>,
    parent: Option<TaskId>,
    kind: ChildKind,
    /// `None` while the task is being driven and once it is terminal.
    driver: Option<Driver>,
    state: TaskState,
    /// Bumped on every suspension; stale wakeups carry an older epoch.
    epoch: u64,
    waiting_on: Option<Pending>,
    /// Spawned children not yet covered by a join.
    children: Vec<TaskId>,
    join: Option<JoinWait>,
    /// Failure with its global order of occurrence.
    failure: Option<(u64, TaskError)>,
    fork_result: Option<Settler>,
}

impl TaskRecord {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("-")
    }
}

/// Task bookkeeping that the driver's `Host` callbacks need.
struct TaskTable {
    records: IndexMap<TaskId, TaskRecord>,
    ready: ReadyQueue,
    inbox: Arc<Inbox>,
    next_id: u64,
}

impl TaskTable {
    fn new() -> Self {
        Self {
            records: IndexMap::new(),
            ready: ReadyQueue::default(),
            inbox: Arc::new(Inbox::default()),
            next_id: 0,
        }
    }

    /// Register a fresh task and queue its first resumption.
    fn insert(&mut self, task: Task, parent: Option<TaskId>, kind: ChildKind, input: Value) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let name = task.name().map(str::to_string);
        self.records.insert(
            id,
            TaskRecord {
                name,
                parent,
                kind,
                driver: Some(Driver::new(id, task, input)),
                state: TaskState::Pending,
                epoch: 0,
                waiting_on: None,
                children: Vec::new(),
                join: None,
                failure: None,
                fork_result: None,
            },
        );
        self.ready.push(id, Ok(Reply::Unit));
        id
    }

    fn make_ready(&mut self, id: TaskId, resumption: Resumption) {
        if let Some(record) = self.records.get_mut(&id) {
            record.state = TaskState::Ready;
        }
        self.ready.push(id, resumption);
    }

    fn begin_join(&mut self, parent: TaskId, members: Vec<TaskId>) {
        let remaining = members
            .iter()
            .filter(|m| {
                self.records
                    .get(*m)
                    .is_some_and(|r| !r.state.is_terminal())
            })
            .count();
        tracing::debug!(task = %parent, members = members.len(), remaining, "join");
        if let Some(record) = self.records.get_mut(&parent) {
            record.join = Some(JoinWait { members, remaining });
        }
        if remaining == 0 {
            self.complete_join(parent);
        }
    }

    /// A spawned child reached a terminal state; advance its parent's join.
    fn child_finished(&mut self, parent: TaskId, child: TaskId) {
        let Some(join) = self
            .records
            .get_mut(&parent)
            .and_then(|r| r.join.as_mut())
        else {
            return;
        };
        if !join.members.contains(&child) {
            return;
        }
        join.remaining -= 1;
        if join.remaining == 0 {
            self.complete_join(parent);
        }
    }

    /// Resume a joining task, raising the earliest failure among its members.
    fn complete_join(&mut self, parent: TaskId) {
        let Some(wait) = self.records.get_mut(&parent).and_then(|r| r.join.take()) else {
            return;
        };
        let mut first: Option<(u64, TaskError)> = None;
        for member in &wait.members {
            // Joined members are terminal; nothing refers to them by id again.
            let Some(record) = self.records.shift_remove(member) else {
                continue;
            };
            if let Some((seq, error)) = record.failure {
                if first.as_ref().map_or(true, |(best, _)| seq < *best) {
                    first = Some((seq, error));
                }
            }
        }
        let resumption = match first {
            Some((_, error)) => {
                tracing::debug!(task = %parent, %error, "join raises child failure");
                Err(error)
            }
            None => Ok(Reply::Unit),
        };
        self.make_ready(parent, resumption);
    }
}

impl Host for TaskTable {
    fn spawn(&mut self, parent: TaskId, task: Task, kind: ChildKind) -> Reply {
        let id = self.insert(task, Some(parent), kind, Value::Null);
        let handle = TaskRef::new(id, &self.inbox);
        match kind {
            ChildKind::Forked => {
                let (result, settler) = pending();
                if let Some(record) = self.records.get_mut(&id) {
                    record.fork_result = Some(settler);
                }
                tracing::debug!(task = %id, parent = %parent, "forked");
                Reply::Fork(ForkHandle::new(handle, result))
            }
            ChildKind::Spawned | ChildKind::Root => {
                if let Some(record) = self.records.get_mut(&parent) {
                    record.children.push(id);
                }
                tracing::debug!(task = %id, parent = %parent, "spawned");
                Reply::Task(handle)
            }
        }
    }

    fn escalate(&mut self, from: TaskId, instruction: Instruction) -> Escalation {
        match instruction {
            Instruction::Introspect => {
                Escalation::Resume(Ok(Reply::Task(TaskRef::new(from, &self.inbox))))
            }
            Instruction::Suspend => Escalation::Park,
            other => Escalation::Resume(Err(TaskError::UnknownInstruction(other.tag().to_string()))),
        }
    }
}

/// Runs one root task and its descendants to an `Outcome`.
pub struct Scheduler {
    table: TaskTable,
    mailbox: Mailbox,
    timers: TimerHeap,
    clock: Clock,
    stall_timeout: Option<Duration>,
    failure_seq: u64,
    root: Option<Result<Value, TaskError>>,
}

impl Scheduler {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            table: TaskTable::new(),
            mailbox: Mailbox::new(),
            timers: TimerHeap::default(),
            clock: Clock::new(config.clock),
            stall_timeout: config.stall_timeout(),
            failure_seq: 0,
            root: None,
        }
    }

    /// Drive `root` (started with `input`) until it is terminal.
    ///
    /// Descendants still live at that point are torn down; their later
    /// sends never reach the mail.
    pub fn run(mut self, root: Task, input: Value) -> Outcome {
        let result = self.drive_root(root, input);
        self.teardown();
        Outcome::new(result, self.mailbox.freeze())
    }

    fn drive_root(&mut self, root: Task, input: Value) -> Result<Value, TaskError> {
        let root_id = self.table.insert(root, None, ChildKind::Root, input);
        tracing::debug!(task = %root_id, clock = ?self.clock, "runtime started");

        loop {
            if let Some(result) = self.root.take() {
                return result;
            }
            self.collect_wakeups();
            if !self.table.ready.is_empty() {
                self.tick();
                continue;
            }
            if let Some(deadline) = self.timers.peek_deadline() {
                self.clock.advance_to(deadline, &self.table.inbox);
                self.fire_timers();
                continue;
            }
            if self.can_be_woken() && self.table.inbox.wait(self.stall_timeout) {
                continue;
            }
            let blocked = self.live_count();
            tracing::warn!(blocked, "no runnable tasks");
            return Err(TaskError::Stalled { blocked });
        }
    }

    fn tick(&mut self) {
        let batch = self.table.ready.len();
        for _ in 0..batch {
            let Some((id, resumption)) = self.table.ready.pop() else {
                break;
            };
            self.run_task(id, resumption);
            if self.root.is_some() {
                return;
            }
        }
    }

    fn run_task(&mut self, id: TaskId, resumption: Resumption) {
        let Some(record) = self.table.records.get_mut(&id) else {
            return;
        };
        if record.state.is_terminal() {
            tracing::warn!(task = %id, "skipping resumption of a terminal task");
            return;
        }
        let Some(mut driver) = record.driver.take() else {
            return;
        };
        record.state = TaskState::Running;
        let _span = tracing::debug_span!("task", id = %id, name = record.label()).entered();

        match driver.drive(resumption, &mut self.mailbox, &mut self.table) {
            Yield::Finished(result) => self.finish(id, result),
            Yield::Blocked(blocked) => {
                if let Some(record) = self.table.records.get_mut(&id) {
                    record.driver = Some(driver);
                }
                self.block(id, blocked);
            }
        }
    }

    fn block(&mut self, id: TaskId, blocked: Blocked) {
        let now = self.clock.now();
        let Some(record) = self.table.records.get_mut(&id) else {
            return;
        };
        record.epoch += 1;
        let epoch = record.epoch;
        match blocked {
            Blocked::Pending(pending) => {
                record.state = TaskState::Suspended(Blocker::Pending);
                record.waiting_on = Some(pending.clone());
                pending.watch(Waker::from(Arc::new(SettleWaker::new(
                    id,
                    epoch,
                    &self.table.inbox,
                ))));
            }
            Blocked::Sleep(duration) => {
                let until = now.saturating_add(duration);
                record.state = TaskState::Suspended(Blocker::Sleep { until });
                self.timers.insert(id, epoch, until);
            }
            Blocked::Join => {
                record.state = TaskState::Suspended(Blocker::Join);
                let members = std::mem::take(&mut record.children);
                self.table.begin_join(id, members);
            }
            Blocked::External => {
                record.state = TaskState::Suspended(Blocker::External);
            }
        }
    }

    fn finish(&mut self, id: TaskId, result: Result<Value, TaskError>) {
        let Some(record) = self.table.records.get_mut(&id) else {
            return;
        };
        record.driver = None;
        record.waiting_on = None;
        match &result {
            Ok(value) => {
                record.state = TaskState::Completed;
                tracing::debug!(task = %id, %value, "completed");
            }
            Err(error) => {
                self.failure_seq += 1;
                record.state = TaskState::Failed;
                record.failure = Some((self.failure_seq, error.clone()));
                tracing::debug!(task = %id, %error, "failed");
            }
        }

        // The fork's failure lives on its handle from here on.
        let forked = match record.fork_result.take() {
            Some(settler) => {
                settler.settle(result.clone());
                true
            }
            None => false,
        };
        let kind = record.kind;
        let parent = record.parent;
        let children = record.children.clone();

        if forked && !children.iter().any(|c| self.is_live(*c)) {
            self.table.records.shift_remove(&id);
        }

        if let (ChildKind::Spawned, Some(parent)) = (kind, parent) {
            self.table.child_finished(parent, id);
        }
        if kind == ChildKind::Root {
            self.root = Some(result);
        }
    }

    fn collect_wakeups(&mut self) {
        for wakeup in self.table.inbox.drain() {
            match wakeup {
                Wakeup::Settled { task, epoch } => {
                    let Some(record) = self.table.records.get_mut(&task) else {
                        continue;
                    };
                    if record.state != TaskState::Suspended(Blocker::Pending) || record.epoch != epoch {
                        tracing::trace!(task = %task, epoch, "stale settle wakeup");
                        continue;
                    }
                    let Some(settled) = record.waiting_on.as_ref().and_then(Pending::peek) else {
                        continue;
                    };
                    record.waiting_on = None;
                    self.table.make_ready(task, settled.map(Reply::Value));
                }
                Wakeup::Resume { task, resumption } => {
                    let Some(record) = self.table.records.get(&task) else {
                        continue;
                    };
                    if record.state != TaskState::Suspended(Blocker::External) {
                        tracing::warn!(task = %task, state = ?record.state, "discarding resume of a task not parked on suspend");
                        continue;
                    }
                    self.table.make_ready(task, resumption.map(Reply::Value));
                }
            }
        }
    }

    fn fire_timers(&mut self) {
        let now = self.clock.now();
        for (task, epoch) in self.timers.pop_expired(now) {
            let due = self.table.records.get(&task).is_some_and(|r| {
                matches!(r.state, TaskState::Suspended(Blocker::Sleep { .. })) && r.epoch == epoch
            });
            if due {
                self.table.make_ready(task, Ok(Reply::Unit));
            }
        }
    }

    /// Whether anything outside the loop could still post a wakeup: some
    /// task awaits an external source and a handle or waker is alive.
    fn can_be_woken(&self) -> bool {
        let awaiting = self.table.records.values().any(|r| {
            matches!(
                r.state,
                TaskState::Suspended(Blocker::Pending | Blocker::External)
            )
        });
        awaiting && Arc::weak_count(&self.table.inbox) > 0
    }

    fn is_live(&self, id: TaskId) -> bool {
        self.table
            .records
            .get(&id)
            .is_some_and(|r| !r.state.is_terminal())
    }

    fn live_count(&self) -> usize {
        self.table
            .records
            .values()
            .filter(|r| !r.state.is_terminal())
            .count()
    }

    /// Report unjoined failures and drop every task still live. Their
    /// pending cleanup never runs. Returns how many were dropped.
    fn teardown(&mut self) -> usize {
        let mut dropped = 0;
        for (id, record) in self.table.records.iter_mut() {
            if let (ChildKind::Spawned, Some((_, error))) = (record.kind, &record.failure) {
                tracing::warn!(task = %id, name = record.label(), %error, "spawned task failed without being joined");
            }
            if record.state.is_terminal() {
                continue;
            }
            if record.driver.take().is_some() {
                tracing::warn!(task = %id, name = record.label(), state = ?record.state, "dropping live task; its cleanup will not run");
            }
            record.waiting_on = None;
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, timers = self.timers.len(), "root finished with live tasks");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(task: Task) -> Outcome {
        Scheduler::new(&RuntimeConfig::default()).run(task, Value::Null)
    }

    #[test]
    fn spawned_child_runs_after_parent_continues() {
        let outcome = run(Task::new(|cx| async move {
            cx.send("parent-before").await?;
            cx.spawn(Task::new(|cx| async move {
                cx.send("child").await?;
                Ok(Value::Null)
            }))
            .await?;
            cx.send("parent-after").await?;
            cx.join().await?;
            cx.send("joined").await?;
            Ok(Value::Null)
        }));
        assert_eq!(
            outcome.mail(),
            &[json!("parent-before"), json!("parent-after"), json!("child"), json!("joined")]
        );
    }

    #[test]
    fn join_raises_first_failure_by_time() {
        let outcome = run(Task::new(|cx| async move {
            cx.spawn(Task::new(|cx| async move {
                cx.sleep(Duration::from_millis(20)).await?;
                Err(TaskError::thrown("slow"))
            }))
            .await?;
            cx.spawn(Task::new(|cx| async move {
                cx.sleep(Duration::from_millis(5)).await?;
                Err(TaskError::thrown("fast"))
            }))
            .await?;
            cx.join().await?;
            Ok(json!("unreachable"))
        }));
        assert_eq!(outcome.error(), Some(&TaskError::thrown("fast")));
    }

    #[test]
    fn join_consumes_tracked_children() {
        let outcome = run(Task::new(|cx| async move {
            cx.spawn(Task::new(|_| async { Err(TaskError::thrown("bad")) }))
                .await?;
            let first = cx.join().await;
            cx.join().await?;
            Ok(json!(first.is_err()))
        }));
        assert_eq!(outcome.value(), Some(&json!(true)));
    }

    #[test]
    fn introspect_returns_own_id() {
        let outcome = run(Task::new(|cx| async move {
            let me = cx.current().await?;
            let child = cx
                .spawn(Task::new(|cx| async move {
                    let me = cx.current().await?;
                    cx.send(me.id().as_u64()).await?;
                    Ok(Value::Null)
                }))
                .await?;
            cx.join().await?;
            Ok(json!([me.id().as_u64(), child.id().as_u64()]))
        }));
        assert_eq!(outcome.value(), Some(&json!([0, 1])));
        assert_eq!(outcome.mail(), &[json!(1)]);
    }

    #[test]
    fn stall_is_reported() {
        let outcome = run(Task::new(|cx| async move {
            cx.suspend().await?;
            Ok(Value::Null)
        }));
        assert_eq!(outcome.error(), Some(&TaskError::Stalled { blocked: 1 }));
    }

    #[test]
    fn root_finishing_tears_down_children() {
        let outcome = run(Task::new(|cx| async move {
            cx.spawn(Task::new(|cx| async move {
                cx.sleep(Duration::from_millis(10)).await?;
                cx.send("too late").await?;
                Ok(Value::Null)
            }))
            .await?;
            cx.send("done").await?;
            Ok(Value::Null)
        }));
        assert!(outcome.is_ok());
        assert_eq!(outcome.mail(), &[json!("done")]);
    }

    #[test]
    fn teardown_drops_live_tasks() {
        let mut sched = Scheduler::new(&RuntimeConfig::default());
        let result = sched.drive_root(
            Task::new(|cx| async move {
                cx.spawn(Task::new(|cx| async move {
                    cx.suspend().await?;
                    Ok(Value::Null)
                }))
                .await?;
                cx.fork(Task::new(|cx| async move {
                    cx.sleep(Duration::from_secs(1)).await?;
                    Ok(Value::Null)
                }))
                .await?;
                Ok(json!("root done"))
            }),
            Value::Null,
        );
        assert_eq!(result, Ok(json!("root done")));
        assert_eq!(sched.teardown(), 2);
        assert!(sched.table.records.values().all(|r| r.driver.is_none()));
    }

    #[test]
    fn joined_and_finished_fork_records_are_released() {
        let mut sched = Scheduler::new(&RuntimeConfig::default());
        let result = sched.drive_root(
            Task::new(|cx| async move {
                for round in 0..50 {
                    cx.spawn(Task::new(move |cx| async move {
                        cx.sleep(Duration::from_millis(1)).await?;
                        Ok(json!(round))
                    }))
                    .await?;
                    let fork = cx
                        .fork(Task::new(|_| async { Err(TaskError::thrown("isolated")) }))
                        .await?;
                    cx.join().await?;
                    assert!(fork.is_finished());
                }
                Ok(Value::Null)
            }),
            Value::Null,
        );
        assert!(result.is_ok());
        assert_eq!(sched.table.records.len(), 1);
        assert_eq!(sched.teardown(), 0);
    }

    #[test]
    fn unjoined_failure_record_survives_until_teardown() {
        let mut sched = Scheduler::new(&RuntimeConfig::default());
        let result = sched.drive_root(
            Task::new(|cx| async move {
                cx.spawn(Task::new(|_| async { Err(TaskError::thrown("lost")) }))
                    .await?;
                cx.sleep(Duration::from_millis(1)).await?;
                Ok(Value::Null)
            }),
            Value::Null,
        );
        assert!(result.is_ok());
        let failed: Vec<_> = sched
            .table
            .records
            .values()
            .filter_map(|r| r.failure.as_ref().map(|(_, e)| e.clone()))
            .collect();
        assert_eq!(failed, vec![TaskError::thrown("lost")]);
        assert_eq!(sched.teardown(), 0);
    }

    #[test]
    fn saturating_sleep_deadline() {
        let outcome = run(Task::new(|cx| async move {
            cx.sleep(Duration::from_millis(1)).await?;
            cx.sleep(Duration::MAX).await?;
            cx.send("woke at the end of time").await?;
            Ok(Value::Null)
        }));
        assert!(outcome.is_ok());
        assert_eq!(outcome.mail(), &[json!("woke at the end of time")]);
    }
}
