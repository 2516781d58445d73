//! Monitor dispatch mechanics, driven deterministically through a manual queue.

use std::sync::Arc;

use settle::test_utils::{ManualExecutor, RecordingReactor, init_test_logging};
use settle::{Activity, ActivityEventKind, CallerThread, FailureCause, LifecycleMonitor};

fn monitored(
    queue: &Arc<ManualExecutor>,
    recorder: &Arc<RecordingReactor>,
) -> Activity<u32> {
    let monitor = LifecycleMonitor::builder()
        .reactor(recorder.clone())
        .executor(queue.clone())
        .build();
    Activity::<u32>::builder()
        .executor(Arc::new(CallerThread))
        .monitor(monitor)
        .build()
}

#[test]
fn reactions_are_deferred_until_the_queue_runs() {
    init_test_logging();
    let queue = Arc::new(ManualExecutor::new());
    let recorder = Arc::new(RecordingReactor::default());
    let activity = monitored(&queue, &recorder);

    activity.enter();
    activity.set_attribute("phase", "load");
    activity.finish(7);

    assert!(recorder.kinds().is_empty(), "nothing ran yet");
    assert_eq!(queue.pending(), 4);

    assert_eq!(queue.run_all(), 4);
    assert_eq!(
        recorder.kinds(),
        vec![
            ActivityEventKind::Entered,
            ActivityEventKind::AttributeChanged,
            ActivityEventKind::Finished,
            ActivityEventKind::Finally,
        ]
    );
    assert_eq!(recorder.keys(), vec!["phase".to_owned()]);
}

#[test]
fn run_next_steps_one_reaction_at_a_time() {
    init_test_logging();
    let queue = Arc::new(ManualExecutor::new());
    let recorder = Arc::new(RecordingReactor::default());
    let activity = monitored(&queue, &recorder);

    activity.enter();
    activity.finish(1);
    assert_eq!(queue.pending(), 3);

    assert!(queue.run_next());
    assert_eq!(recorder.kinds(), vec![ActivityEventKind::Entered]);
    assert!(queue.run_next());
    assert_eq!(
        recorder.kinds(),
        vec![ActivityEventKind::Entered, ActivityEventKind::Finished]
    );
    assert!(queue.run_next());
    assert!(!queue.run_next(), "queue drained");
    assert_eq!(recorder.kinds().last(), Some(&ActivityEventKind::Finally));
}

#[test]
fn deactivation_mid_stream_drops_only_the_gap() {
    init_test_logging();
    let queue = Arc::new(ManualExecutor::new());
    let recorder = Arc::new(RecordingReactor::default());
    let monitor = LifecycleMonitor::builder()
        .reactor(recorder.clone())
        .executor(queue.clone())
        .build();
    let activity = Activity::<u32>::builder()
        .executor(Arc::new(CallerThread))
        .monitor(monitor.clone())
        .build();

    activity.enter();
    monitor.set_active(false);
    activity.set_attribute("lost", "yes");
    monitor.set_active(true);
    // Deactivation muted the event, not the write itself.
    assert_eq!(activity.attribute("lost"), Some("yes".into()));
    activity.finish(2);
    queue.run_all();

    assert_eq!(
        recorder.kinds(),
        vec![
            ActivityEventKind::Entered,
            ActivityEventKind::Finished,
            ActivityEventKind::Finally,
        ],
        "the attribute change fell into the inactive window"
    );
    assert!(recorder.keys().is_empty());
    assert_eq!(
        activity.attribute("lost"),
        None,
        "termination seals and clears the bag"
    );
}

#[test]
fn reactions_attribute_events_to_the_right_activity() {
    init_test_logging();
    let queue = Arc::new(ManualExecutor::new());
    let recorder = Arc::new(RecordingReactor::default());
    let first = monitored(&queue, &recorder);
    let second = monitored(&queue, &recorder);

    first.enter();
    second.enter();
    second.fail(FailureCause::msg("second lane jammed"));
    first.finish(10);
    queue.run_all();

    let reactions = recorder.reactions();
    let failed = reactions
        .iter()
        .find(|reaction| reaction.kind == ActivityEventKind::Failed)
        .expect("failure reaction recorded");
    assert_eq!(failed.activity, second.id());
    assert_eq!(failed.cause.as_deref(), Some("second lane jammed"));

    let finished = reactions
        .iter()
        .find(|reaction| reaction.kind == ActivityEventKind::Finished)
        .expect("finish reaction recorded");
    assert_eq!(finished.activity, first.id());
}

#[test]
fn default_build_reacts_on_the_caller_thread() {
    init_test_logging();
    let recorder = Arc::new(RecordingReactor::default());
    let monitor = LifecycleMonitor::builder().reactor(recorder.clone()).build();
    let activity = Activity::<u32>::builder()
        .executor(Arc::new(CallerThread))
        .monitor(monitor)
        .build();

    activity.enter();
    assert_eq!(
        recorder.kinds(),
        vec![ActivityEventKind::Entered],
        "no queue in between: the reaction already happened"
    );
    activity.cancel(false);
    assert_eq!(recorder.kinds().last(), Some(&ActivityEventKind::Finally));
}
