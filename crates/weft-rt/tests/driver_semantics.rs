// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-task semantics: waits, sends, structured cleanup, delegation.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use serde_json::{json, Value};
use weft_rt::{catch, finally, run, Cx, Instruction, Pending, Task, TaskError};

use common::{init_logging, strings};

#[test]
fn ready_wait_resumes_in_the_same_tick() {
    init_logging();
    let flag = Rc::new(Cell::new(false));
    let seen = flag.clone();
    let outcome = run(Task::new(move |cx| async move {
        let setter = seen.clone();
        cx.spawn(Task::new(move |_cx| async move {
            setter.set(true);
            Ok(Value::Null)
        }))
        .await?;

        let ready = cx.wait(5).await?;
        let after_ready = seen.get();
        let settled = cx.wait(Pending::resolved(6)).await?;
        let after_pending = seen.get();
        Ok(json!([ready, after_ready, settled, after_pending]))
    }));

    assert_eq!(outcome.value(), Some(&json!([5, false, 6, true])));
    assert!(flag.get());
}

#[test]
fn pending_wait_is_a_suspension_boundary() {
    init_logging();
    let outcome = run(Task::new(|cx| async move {
        let (gate, settler) = weft_rt::pending();
        cx.spawn(Task::new(move |cx| async move {
            cx.send("child ran").await?;
            settler.resolve(5);
            Ok(Value::Null)
        }))
        .await?;
        cx.send("before wait").await?;
        let v = cx.wait(&gate).await?;
        cx.send("after wait").await?;
        Ok(v)
    }));

    assert_eq!(outcome.value(), Some(&json!(5)));
    assert_eq!(strings(outcome.mail()), ["before wait", "child ran", "after wait"]);
}

#[test]
fn unknown_instruction_fails_the_task() {
    init_logging();
    let outcome = run(Task::new(|cx| async move {
        cx.send("before").await?;
        cx.perform(Instruction::foreign("teleport", json!({"to": "mars"}))).await?;
        cx.send("never").await?;
        Ok(Value::Null)
    }));

    assert_eq!(
        outcome.error(),
        Some(&TaskError::UnknownInstruction("teleport".to_string()))
    );
    assert_eq!(strings(outcome.mail()), ["before"]);
}

#[test]
fn unknown_instruction_still_runs_cleanup() {
    let outcome = run(Task::new(|cx| async move {
        finally(
            async {
                cx.send("body").await?;
                cx.perform(Instruction::foreign("teleport", Value::Null)).await?;
                cx.send("unreachable").await?;
                Ok(Value::Null)
            },
            async { cx.send("cleanup").await },
        )
        .await
    }));

    assert_eq!(
        outcome.error(),
        Some(&TaskError::UnknownInstruction("teleport".to_string()))
    );
    assert_eq!(strings(outcome.mail()), ["body", "cleanup"]);
}

#[test]
fn swallowed_unknown_instruction_is_still_fatal() {
    let outcome = run(Task::new(|cx| async move {
        let caught = cx.perform(Instruction::foreign("teleport", Value::Null)).await.is_err();
        cx.send(json!({ "caught": caught })).await?;
        Ok(json!("recovered?"))
    }));

    assert_eq!(
        outcome.error(),
        Some(&TaskError::UnknownInstruction("teleport".to_string()))
    );
    assert_eq!(outcome.mail(), &[json!({ "caught": true })]);
}

#[test]
fn rejected_wait_is_catchable() {
    init_logging();
    let outcome = run(Task::new(|cx| async move {
        let recovered = match cx.wait(Pending::rejected("boom")).await {
            Ok(_) => "not raised".to_string(),
            Err(e) => format!("caught {e}"),
        };
        cx.send(recovered.clone()).await?;
        Ok(json!(recovered))
    }));

    assert!(outcome.is_ok());
    assert_eq!(outcome.value(), Some(&json!("caught boom")));
}

#[test]
fn catch_combinator_recovers() {
    let outcome = run(Task::new(|cx| async move {
        catch(
            async { cx.wait(Pending::rejected("nope")).await },
            |e| async move { Ok(json!({ "recovered": e.to_value() })) },
        )
        .await
    }));
    assert_eq!(outcome.value(), Some(&json!({ "recovered": "nope" })));
}

async fn guarded(cx: &Cx, fail: bool) -> Result<Value, TaskError> {
    finally(
        async {
            cx.send("body").await?;
            if fail {
                cx.wait(Pending::rejected("bad")).await?;
            }
            Ok(json!("fine"))
        },
        async { cx.send("cleanup").await },
    )
    .await
}

#[test]
fn finally_runs_on_success() {
    let outcome = run(Task::new(|cx| async move { guarded(&cx, false).await }));
    assert_eq!(outcome.value(), Some(&json!("fine")));
    assert_eq!(strings(outcome.mail()), ["body", "cleanup"]);
}

#[test]
fn finally_runs_on_failure_and_keeps_cleanup_mail() {
    let outcome = run(Task::new(|cx| async move { guarded(&cx, true).await }));
    assert_eq!(outcome.error(), Some(&TaskError::rejected("bad")));
    assert_eq!(strings(outcome.mail()), ["body", "cleanup"]);
}

#[test]
fn cleanup_failure_supersedes_original_error() {
    init_logging();
    let outcome = run(Task::new(|cx| async move {
        finally(
            async {
                cx.send("one").await?;
                cx.send("two").await?;
                cx.wait(Pending::rejected("boom")).await?;
                cx.send("three").await?;
                Ok(Value::Null)
            },
            async {
                cx.wait(Pending::rejected("oops")).await?;
                cx.send("four").await?;
                Ok(())
            },
        )
        .await
    }));

    assert!(!outcome.is_ok());
    assert_eq!(outcome.error(), Some(&TaskError::rejected("oops")));
    assert_eq!(strings(outcome.mail()), ["one", "two"]);
    assert_eq!(
        outcome.to_json(),
        json!({ "ok": false, "error": "oops", "mail": ["one", "two"] })
    );
}

async fn helper(cx: &Cx) -> Result<(), TaskError> {
    cx.wait(Pending::resolved(Value::Null)).await?;
    cx.send("c1").await
}

#[test]
fn inline_delegation_keeps_call_order() {
    let outcome = run(Task::new(|cx| async move {
        cx.send("one").await?;
        cx.send("two").await?;
        helper(&cx).await?;
        cx.send("three").await?;
        cx.send("four").await?;
        Ok(Value::Null)
    }));
    assert_eq!(strings(outcome.mail()), ["one", "two", "c1", "three", "four"]);
}

fn deterministic_task() -> Task {
    Task::new(|cx| async move {
        let mut total = 0;
        for i in 0..5 {
            let v = cx.wait(Pending::resolved(i)).await?;
            total += v.as_i64().unwrap_or_default();
            cx.send(json!({ "step": i, "total": total })).await?;
        }
        let caught = cx.wait(Pending::rejected("late")).await.is_err();
        Ok(json!({ "total": total, "caught": caught }))
    })
}

#[test]
fn rerunning_a_deterministic_task_is_idempotent() {
    let first = run(deterministic_task());
    let second = run(deterministic_task());
    assert_eq!(first, second);
    assert_eq!(first.value(), Some(&json!({ "total": 10, "caught": true })));
    assert_eq!(first.mail().len(), 5);
}

#[test]
fn uncaught_throw_becomes_outcome_error() {
    let outcome = run(Task::new(|cx| async move {
        cx.send("about to fail").await?;
        Err(TaskError::thrown(json!({ "code": 42 })))
    }));
    assert_eq!(outcome.error(), Some(&TaskError::thrown(json!({ "code": 42 }))));
    assert_eq!(
        outcome.to_json(),
        json!({ "ok": false, "error": { "code": 42 }, "mail": ["about to fail"] })
    );
}

#[test]
fn initial_input_reaches_root() {
    let runtime = weft_rt::Runtime::default();
    let outcome = runtime.run_with_input(
        Task::new(|cx| async move {
            let n = cx.input()["n"].as_i64().unwrap_or_default();
            Ok(json!(n * 2))
        }),
        json!({ "n": 21 }),
    );
    assert_eq!(outcome.value(), Some(&json!(42)));
}
