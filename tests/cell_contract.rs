//! Cross-thread contract of the cell layer: one settle, many observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use settle::test_utils::init_test_logging;
use settle::{
    CellError, Completable, Completer, Executor, FailureCause, Promise, Task, TaskContext,
    ThreadPool,
};

#[test]
fn waiters_across_threads_observe_one_outcome() {
    init_test_logging();
    let cell: Completable<String> = Completable::with_label("broadcast");

    let mut waiters = Vec::new();
    for _ in 0..4 {
        let cell = cell.clone();
        waiters.push(thread::spawn(move || cell.wait()));
    }

    let recorded = cell.set_result("ready".to_owned()).is_ok();
    assert!(recorded, "first settle should claim the slot");

    for waiter in waiters {
        let seen = waiter.join().expect("waiter thread panicked");
        assert_eq!(seen.expect("settled with a value"), "ready");
    }
}

#[test]
fn callbacks_from_foreign_threads_each_fire_once() {
    init_test_logging();
    let cell: Completable<u32> = Completable::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let mut registrars = Vec::new();
    for _ in 0..3 {
        let cell = cell.clone();
        let fired = fired.clone();
        registrars.push(thread::spawn(move || {
            cell.add_callback(move |outcome| {
                assert!(outcome.is_finished());
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }));
    }
    for registrar in registrars {
        registrar.join().expect("registrar thread panicked");
    }

    cell.set_result(11).expect("fresh cell accepts a result");

    // Late registration sees the settled outcome immediately.
    let late = fired.clone();
    cell.add_callback(move |outcome| {
        assert_eq!(outcome.value(), Some(&11));
        late.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(fired.load(Ordering::SeqCst), 4);
}

#[test]
fn task_on_pool_reports_through_its_cell() {
    init_test_logging();
    let pool = ThreadPool::new("contract", 2).expect("pool spawns");
    let task = Arc::new(Task::with_label("sum", |_ctx: &TaskContext| {
        Ok((1..=10u32).sum::<u32>())
    }));

    let runner = Arc::clone(&task);
    let handle = pool.submit(Box::new(move || runner.run()));
    assert!(handle.is_some(), "live pool accepts units");

    let value = task.cell().wait();
    assert_eq!(value.expect("task produced its sum"), 55);
    pool.shutdown();
}

#[test]
fn deferred_completion_crosses_threads() {
    init_test_logging();
    let (send_completer, recv_completer) = mpsc::channel::<Completer<&'static str>>();
    let task = Task::deferred(move |_ctx: &TaskContext, completer| {
        send_completer.send(completer).expect("receiver alive");
        Ok(())
    });

    task.run();
    assert!(!task.is_done(), "cell stays pending after the body returns");

    let completer = recv_completer.recv().expect("completer escaped the body");
    let finisher = thread::spawn(move || completer.finish("out-of-band"));
    assert!(finisher.join().expect("finisher thread panicked"));
    assert_eq!(task.cell().wait().expect("completer settled it"), "out-of-band");
}

#[test]
fn wait_timeout_expiry_is_not_final() {
    init_test_logging();
    let promise: Promise<u32> = Promise::with_label("slow-answer");

    let early = promise.wait_timeout(Duration::from_millis(10));
    assert!(matches!(early, Err(CellError::WaitTimeout)));
    assert!(!promise.is_done(), "timeout does not settle anything");

    assert!(promise.finish(42));
    let bounded = promise.wait_timeout(Duration::from_millis(10));
    assert_eq!(bounded.expect("settled before the deadline"), 42);
    assert_eq!(promise.wait().expect("wait repeats the outcome"), 42);
}

#[test]
fn failure_cause_survives_the_thread_hop() {
    init_test_logging();
    let cell: Completable<u32> = Completable::new();
    let settler = {
        let cell = cell.clone();
        thread::spawn(move || cell.set_failure(FailureCause::msg("remote side hung up")))
    };
    settler.join().expect("settler thread panicked").expect("slot was free");

    match cell.wait() {
        Err(CellError::Failed(cause)) => {
            assert_eq!(cause.to_string(), "remote side hung up");
        }
        other => panic!("expected a failure, got {other:?}"),
    }
}
