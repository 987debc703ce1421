// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! End-to-end scenarios exercised through the public `Controller` API only.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use usage_monitor::{
    Clock, ColdStartMode, Controller, ManualClock, MonitorConfig, MonitorError, Notifier, Opaque,
    TimerThread,
};

#[derive(Default)]
struct RecordingNotifier {
    limit_reached: Mutex<Vec<(i32, i32, u64, u64, Opaque)>>,
    session_end: Mutex<Vec<(i32, i32, u64, Opaque)>>,
}

impl Notifier for RecordingNotifier {
    fn on_limit_reached(
        &self,
        observer_id: i32,
        user_id: i32,
        time_limit_ms: u64,
        time_elapsed_ms: u64,
        callback: Opaque,
    ) {
        self.limit_reached
            .lock()
            .unwrap()
            .push((observer_id, user_id, time_limit_ms, time_elapsed_ms, callback));
    }

    fn on_session_end(&self, observer_id: i32, user_id: i32, time_elapsed_ms: u64, callback: Opaque) {
        self.session_end
            .lock()
            .unwrap()
            .push((observer_id, user_id, time_elapsed_ms, callback));
    }
}

fn harness() -> (Arc<Controller>, Arc<ManualClock>, Arc<RecordingNotifier>) {
    let clock = Arc::new(ManualClock::new(0));
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = Controller::new(clock.clone(), notifier.clone(), MonitorConfig::default());
    (controller, clock, notifier)
}

/// Scenario: a single continuous run that crosses the limit exactly at stop time.
#[test]
fn continuous_run_crossing_the_limit_on_stop() {
    let (controller, clock, notifier) = harness();
    controller
        .add_app_usage_observer(100, 1, vec!["com.example.app".into()], 60_000, Opaque(1), 7)
        .unwrap();

    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(60_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();

    let fired = notifier.limit_reached.lock().unwrap();
    assert_eq!(*fired, vec![(1, 7, 60_000, 60_000, Opaque(1))]);
}

/// Scenario: usage accumulates across several disjoint start/stop runs before crossing.
#[test]
fn usage_accumulates_across_multiple_runs() {
    let (controller, clock, notifier) = harness();
    controller
        .add_app_usage_observer(100, 1, vec!["com.example.app".into()], 90_000, Opaque(5), 7)
        .unwrap();

    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(30_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();
    assert!(notifier.limit_reached.lock().unwrap().is_empty());

    clock.set(100_000);
    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(160_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();

    let fired = notifier.limit_reached.lock().unwrap();
    assert_eq!(*fired, vec![(1, 7, 90_000, 90_000, Opaque(5))]);
}

/// Scenario: two entities under the same observer overlap, counting as one continuous run.
#[test]
fn overlapping_observed_entities_form_one_run() {
    let (controller, clock, notifier) = harness();
    controller
        .add_app_usage_observer(
            100,
            1,
            vec!["com.example.a".into(), "com.example.b".into()],
            60_000,
            Opaque(2),
            7,
        )
        .unwrap();

    controller.note_usage_start("com.example.a", 7).unwrap();
    clock.set(10_000);
    controller.note_usage_start("com.example.b", 7).unwrap();
    clock.set(40_000);
    controller.note_usage_stop("com.example.a", 7).unwrap();
    assert!(notifier.limit_reached.lock().unwrap().is_empty());

    clock.set(70_000);
    controller.note_usage_stop("com.example.b", 7).unwrap();

    let fired = notifier.limit_reached.lock().unwrap();
    assert_eq!(*fired, vec![(1, 7, 60_000, 70_000, Opaque(2))]);
}

/// Scenario: an app observer self-removes after firing; a later explicit removal is a no-op,
/// and a fresh registration under the same observer_id starts a clean new run.
#[test]
fn app_observer_self_removes_after_firing() {
    let (controller, clock, notifier) = harness();
    controller
        .add_app_usage_observer(100, 1, vec!["com.example.app".into()], 60_000, Opaque(1), 7)
        .unwrap();
    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(60_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();
    assert_eq!(notifier.limit_reached.lock().unwrap().len(), 1);

    // Explicit removal of an already-self-removed observer must not panic.
    controller.remove_app_usage_observer(100, 1, 7);

    // Re-registering under the same (uid, observer_id) starts a fresh run.
    controller
        .add_app_usage_observer(100, 1, vec!["com.example.app".into()], 60_000, Opaque(9), 7)
        .unwrap();
    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(1_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();
    assert_eq!(notifier.limit_reached.lock().unwrap().len(), 1);
}

/// Scenario: a session observer fires once per session, stays registered afterward, does not
/// re-fire on further accumulation within the same session, and re-arms for a second crossing
/// once a gap past the new-session threshold starts a fresh session.
///
/// (Delivery of the deferred `INFORM_SESSION_END` notification itself is exercised against the
/// crate-internal timer pump in `src/controller/tests.rs`; this test sticks to the public API.)
#[test]
fn session_observer_rearms_after_a_new_session() {
    let (controller, clock, notifier) = harness();
    controller
        .add_usage_session_observer(
            100,
            2,
            vec!["com.example.app".into()],
            60_000,
            30_000,
            Opaque(1),
            Opaque(2),
            7,
        )
        .unwrap();

    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(60_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();
    assert_eq!(notifier.limit_reached.lock().unwrap().len(), 1);

    // Within the threshold: the same session continues. Accumulating further without
    // crossing a fresh boundary must not fire again.
    clock.set(70_000);
    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(75_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();
    assert_eq!(notifier.limit_reached.lock().unwrap().len(), 1);

    // A gap past the threshold (30_000ms of idle here) starts a fresh session from zero,
    // able to cross the limit and fire again.
    clock.set(200_000);
    controller.note_usage_start("com.example.app", 7).unwrap();
    clock.set(260_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();
    assert_eq!(notifier.limit_reached.lock().unwrap().len(), 2);
}

/// Scenario: per-uid quota rejects a registration past the configured cap.
#[test]
fn registration_quota_is_enforced() {
    let mut config = MonitorConfig::default();
    config.max_observers_per_uid = 2;
    let clock = Arc::new(ManualClock::new(0));
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = Controller::new(clock, notifier, config);

    controller
        .add_app_usage_observer(100, 1, vec!["a".into()], 60_000, Opaque(0), 7)
        .unwrap();
    controller
        .add_app_usage_observer(100, 2, vec!["b".into()], 60_000, Opaque(0), 7)
        .unwrap();

    let err = controller
        .add_app_usage_observer(100, 3, vec!["c".into()], 60_000, Opaque(0), 7)
        .unwrap_err();
    assert!(matches!(err, MonitorError::QuotaExceeded(_)));
}

/// Scenario 6 from the spec's concrete scenario list, at the documented default cap: 1000 app
/// observers for a uid all succeed, the 1001st fails, and removing one then re-registering
/// succeeds again.
#[test]
fn default_quota_admits_exactly_a_thousand_observers_per_uid() {
    let (controller, _clock, _notifier) = harness();

    for observer_id in 0..1_000 {
        controller
            .add_app_usage_observer(42, observer_id, vec![format!("entity-{observer_id}")], 60_000, Opaque(0), 7)
            .unwrap();
    }

    let err = controller
        .add_app_usage_observer(42, 1_000, vec!["entity-overflow".into()], 60_000, Opaque(0), 7)
        .unwrap_err();
    assert!(matches!(err, MonitorError::QuotaExceeded(_)));

    controller.remove_app_usage_observer(42, 0, 7);
    controller
        .add_app_usage_observer(42, 1_000, vec!["entity-overflow".into()], 60_000, Opaque(0), 7)
        .unwrap();
}

/// A dedicated `TimerThread` driven by a real clock delivers a firing without any explicit
/// `note_usage_stop` call, proving the background-thread path (not just direct effect
/// application) reaches the Notifier.
#[test]
fn background_timer_thread_delivers_a_firing_without_an_explicit_stop() {
    struct RealtimeManualClock(Arc<ManualClock>);
    impl Clock for RealtimeManualClock {
        fn now_millis(&self) -> u64 {
            self.0.now_millis()
        }
    }

    let clock = Arc::new(ManualClock::new(0));
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = Controller::new(clock.clone(), notifier.clone(), MonitorConfig::default());

    let thread_clock: Arc<dyn Clock> = Arc::new(RealtimeManualClock(clock.clone()));
    let timer_thread = TimerThread::spawn(controller.clone(), thread_clock);

    controller
        .add_app_usage_observer(100, 1, vec!["com.example.app".into()], 60_000, Opaque(3), 7)
        .unwrap();
    controller.note_usage_start("com.example.app", 7).unwrap();

    clock.set(60_000);
    timer_thread.wake();
    // Give the background thread a chance to observe the advanced clock and pump the timer.
    thread::sleep(Duration::from_millis(200));

    let fired = notifier.limit_reached.lock().unwrap();
    assert_eq!(*fired, vec![(1, 7, 60_000, 60_000, Opaque(3))]);
}

/// Cold-start: an entity already active when an observer registers still starts accumulating
/// immediately, rather than waiting for a fresh activation.
#[test]
fn cold_start_counts_an_already_active_entity() {
    let mut config = MonitorConfig::default();
    config.cold_start_mode = ColdStartMode::Corrected;
    let clock = Arc::new(ManualClock::new(0));
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = Controller::new(clock.clone(), notifier.clone(), config);

    controller.note_usage_start("com.example.app", 7).unwrap();
    controller
        .add_app_usage_observer(100, 1, vec!["com.example.app".into()], 60_000, Opaque(4), 7)
        .unwrap();

    clock.set(60_000);
    controller.note_usage_stop("com.example.app", 7).unwrap();

    assert_eq!(
        *notifier.limit_reached.lock().unwrap(),
        vec![(1, 7, 60_000, 60_000, Opaque(4))]
    );
}
