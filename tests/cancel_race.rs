//! Races between cancellation and completion, driven from real threads.
//!
//! The slot invariant under test: whichever side loses the race leaves no
//! trace on the outcome, and a discarded result always reaches the undo hook.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use settle::test_utils::init_test_logging;
use settle::{CancelReason, CellError, Completable, FailureCause, Promise, Task, TaskContext};

#[test]
fn racing_cancel_and_complete_settle_exactly_once() {
    init_test_logging();

    for round in 0..64 {
        let cell: Completable<u32> = Completable::new();
        let discarded: Arc<Mutex<Option<Option<u32>>>> = Arc::new(Mutex::new(None));
        let undo_saw = discarded.clone();
        cell.set_undo(move |payload| {
            *undo_saw.lock() = Some(payload);
        });

        let start = Arc::new(Barrier::new(2));
        let completer = {
            let cell = cell.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                thread::sleep(Duration::from_micros(fastrand::u64(0..50)));
                cell.set_result(round)
            })
        };
        let canceller = {
            let cell = cell.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                thread::sleep(Duration::from_micros(fastrand::u64(0..50)));
                cell.cancel(false)
            })
        };

        let completed = completer.join().expect("completer panicked");
        let cancel_won = canceller.join().expect("canceller panicked");
        assert!(
            completed.is_ok(),
            "round {round}: the completion slot is consumed exactly once, win or lose"
        );
        assert!(cell.is_done(), "round {round}: somebody settled");

        let undo = discarded.lock().clone();
        if cancel_won {
            assert!(cell.is_cancelled(), "round {round}: cancel reported a win");
            assert_eq!(
                undo,
                Some(Some(round)),
                "round {round}: discarded result must reach the undo hook"
            );
        } else {
            assert!(cell.is_finished(), "round {round}: completion kept its win");
            assert_eq!(undo, None, "round {round}: nothing was discarded");
        }
    }
}

#[test]
fn cancel_during_active_body_defers_listener_delivery() {
    init_test_logging();

    let (release, gate) = mpsc::channel::<()>();
    let task: Arc<Task<u32>> = Arc::new(Task::new(move |_ctx: &TaskContext| {
        gate.recv().expect("test releases the body");
        Ok(7)
    }));

    let runner = {
        let task = Arc::clone(&task);
        thread::spawn(move || task.run())
    };
    let mut spins = 0;
    while !task.cell().is_active() {
        spins += 1;
        assert!(spins < 2000, "body never started");
        thread::sleep(Duration::from_millis(1));
    }

    let delivered = Arc::new(AtomicUsize::new(0));
    let observed = delivered.clone();
    task.cell().add_callback(move |outcome| {
        assert!(outcome.is_cancelled());
        observed.fetch_add(1, Ordering::SeqCst);
    });
    let discarded: Arc<Mutex<Option<Option<u32>>>> = Arc::new(Mutex::new(None));
    let undo_saw = discarded.clone();
    task.cell().set_undo(move |payload| {
        *undo_saw.lock() = Some(payload);
    });

    assert!(task.cancel(false), "cancel wins while the body runs");
    assert!(task.is_cancelled(), "state flips immediately");
    assert_eq!(
        delivered.load(Ordering::SeqCst),
        0,
        "delivery is deferred to the in-flight computation"
    );

    release.send(()).expect("runner alive");
    runner.join().expect("runner panicked");

    assert_eq!(delivered.load(Ordering::SeqCst), 1, "deferred callback ran once");
    assert_eq!(
        discarded.lock().clone(),
        Some(Some(7)),
        "the body's late result was routed to undo"
    );
}

#[test]
fn undo_distinguishes_result_from_failure() {
    init_test_logging();

    let kept: Arc<Mutex<Vec<Option<u32>>>> = Arc::new(Mutex::new(Vec::new()));

    let with_result: Promise<u32> = Promise::new();
    let sink = kept.clone();
    with_result.set_undo(move |payload| sink.lock().push(payload));
    with_result.cancel(false);
    assert!(
        with_result.finish(9),
        "late finish still consumes the completion slot"
    );
    assert!(with_result.is_cancelled(), "but the outcome stays cancelled");

    let with_failure: Promise<u32> = Promise::new();
    let sink = kept.clone();
    with_failure.set_undo(move |payload| sink.lock().push(payload));
    with_failure.cancel(false);
    assert!(
        with_failure.fail(FailureCause::msg("irrelevant now")),
        "late failure still consumes the completion slot"
    );
    assert!(with_failure.is_cancelled(), "failure cannot overturn the cancel");

    assert_eq!(
        kept.lock().clone(),
        vec![Some(9), None],
        "undo sees the value for results, nothing for failures"
    );
}

#[test]
fn staged_release_races_direct_finish() {
    init_test_logging();

    for round in 0..64 {
        let promise: Promise<u32> = Promise::new();
        assert!(promise.stage_finish(round), "staging a pending promise");

        let start = Arc::new(Barrier::new(2));
        let releaser = {
            let promise = promise.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                thread::sleep(Duration::from_micros(fastrand::u64(0..50)));
                promise.release()
            })
        };
        let finisher = {
            let promise = promise.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                thread::sleep(Duration::from_micros(fastrand::u64(0..50)));
                promise.finish(1000 + round)
            })
        };

        let released = releaser.join().expect("releaser panicked");
        let finished = finisher.join().expect("finisher panicked");
        assert!(
            released ^ finished,
            "round {round}: exactly one side settles, the other is swallowed"
        );

        let value = promise.wait().expect("a value settled either way");
        if released {
            assert_eq!(value, round, "round {round}: staged outcome won");
        } else {
            assert_eq!(value, 1000 + round, "round {round}: direct finish won");
        }
    }
}

#[test]
fn many_cancellers_produce_one_winner() {
    init_test_logging();
    const MESSAGES: [&str; 6] = ["c0", "c1", "c2", "c3", "c4", "c5"];

    let cell: Completable<u32> = Completable::new();
    let start = Arc::new(Barrier::new(MESSAGES.len()));
    let mut cancellers = Vec::new();
    for message in MESSAGES {
        let cell = cell.clone();
        let start = start.clone();
        cancellers.push(thread::spawn(move || {
            start.wait();
            cell.cancel_with(CancelReason::user(message), false)
        }));
    }

    let wins: Vec<bool> = cancellers
        .into_iter()
        .map(|c| c.join().expect("canceller panicked"))
        .collect();
    let winners = wins.iter().filter(|won| **won).count();
    assert_eq!(winners, 1, "exactly one cancellation is recorded");

    let winner_index = wins.iter().position(|won| *won).expect("one winner exists");
    match cell.wait() {
        Err(CellError::Cancelled(reason)) => {
            assert_eq!(reason.message, Some(MESSAGES[winner_index]));
        }
        other => panic!("expected a cancelled outcome, got {other:?}"),
    }
}
