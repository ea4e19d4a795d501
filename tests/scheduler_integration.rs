//! End-to-end drive-loop scenarios against a recording host.
//!
//! Each test runs the scheduler through a simulated main loop: a manual
//! millisecond clock stepped in small increments, with every pass going
//! through `drive()` exactly as the firmware's outer loop would.

use std::collections::HashMap;

use flexnode::clock::MonotonicMs;
use flexnode::config::SchedulerConfig;
use flexnode::events::{EventPayload, QueueEvent};
use flexnode::ports::{
    CallbackOutcome, CallbackRequest, FunctionCode, SchedulerHost, StorageError, StoragePort,
};
use flexnode::scheduler::id::{GpioKind, TimerId};
use flexnode::scheduler::{DriveOutcome, Scheduler};

// ───────────────────────────────────────────────────────────────
// Harness
// ───────────────────────────────────────────────────────────────

/// Records every callback and pin write with the tick it happened at.
struct RecordingHost {
    now: MonotonicMs,
    calls: Vec<(MonotonicMs, CallbackRequest)>,
    pins: Vec<(MonotonicMs, GpioKind, u8, u8)>,
}

impl RecordingHost {
    fn new() -> Self {
        Self {
            now: MonotonicMs(0),
            calls: Vec::new(),
            pins: Vec::new(),
        }
    }

    fn calls_with(&self, function: FunctionCode) -> Vec<&(MonotonicMs, CallbackRequest)> {
        self.calls.iter().filter(|(_, c)| c.function == function).collect()
    }
}

impl SchedulerHost for RecordingHost {
    fn invoke(&mut self, request: &CallbackRequest) -> CallbackOutcome {
        self.calls.push((self.now, request.clone()));
        CallbackOutcome::handled()
    }

    fn write_pin(&mut self, expander: GpioKind, pin: u8, value: u8) {
        self.pins.push((self.now, expander, pin, value));
    }

    fn is_valid_task(&self, index: u8) -> bool {
        index < 12
    }

    fn is_valid_device(&self, index: u8) -> bool {
        index < 12
    }

    fn is_valid_timer_index(&self, index: u8) -> bool {
        (1..=8).contains(&index)
    }

    fn task_poll_interval_ms(&self, _index: u8) -> Option<u32> {
        None
    }
}

struct MemStore(HashMap<String, Vec<u8>>);

impl StoragePort for MemStore {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.0.get(&format!("{ns}::{key}")) {
            Some(v) => {
                let len = v.len().min(buf.len());
                buf[..len].copy_from_slice(&v[..len]);
                Ok(len)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.0.insert(format!("{ns}::{key}"), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.0.remove(&format!("{ns}::{key}"));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.0.contains_key(&format!("{ns}::{key}"))
    }
}

fn harness() -> (Scheduler, RecordingHost, MemStore) {
    (
        Scheduler::new(SchedulerConfig::default(), MonotonicMs(0)),
        RecordingHost::new(),
        MemStore(HashMap::new()),
    )
}

/// Step the simulated clock to `until` in `step_ms` increments, driving
/// the scheduler once per step, and collect every outcome.
fn run_until(
    sched: &mut Scheduler,
    host: &mut RecordingHost,
    store: &mut MemStore,
    until: u32,
    step_ms: u32,
) -> Vec<(MonotonicMs, DriveOutcome)> {
    let mut outcomes = Vec::new();
    let mut now = host.now;
    while now.raw() < until {
        now = now.plus_ms(step_ms);
        host.now = now;
        outcomes.push((now, sched.drive(now, host, store)));
    }
    outcomes
}

// ───────────────────────────────────────────────────────────────
// Scenarios
// ───────────────────────────────────────────────────────────────

#[test]
fn delayed_pin_write_fires_exactly_once() {
    let (mut sched, mut host, mut store) = harness();
    sched.schedule_gpio_timer(GpioKind::Internal, 4, 1, 100, MonotonicMs(0));

    run_until(&mut sched, &mut host, &mut store, 1_000, 10);

    assert_eq!(host.pins.len(), 1, "exactly one pin write");
    let (at, expander, pin, value) = host.pins[0];
    assert_eq!((expander, pin, value), (GpioKind::Internal, 4, 1));
    assert_eq!(at, MonotonicMs(100), "fires on the first pass at/after the deadline");
    assert_eq!(sched.last_pin_state(GpioKind::Internal, 4), Some(1));
    assert_eq!(sched.pending_timers(), 0);
}

#[test]
fn recurring_rules_timer_counts_down_then_stops() {
    let (mut sched, mut host, mut store) = harness();
    sched
        .set_rules_timer(&host, 3, 1_000, 3, MonotonicMs(0))
        .unwrap();

    run_until(&mut sched, &mut host, &mut store, 5_000, 50);

    let fires = host.calls_with(FunctionCode::RulesTimerFire);
    assert_eq!(fires.len(), 3, "count of 3 means exactly three fires");
    for (n, (at, call)) in fires.iter().enumerate() {
        let ordinal = (n + 1) as i32;
        assert_eq!(call.par[0], ordinal, "1-based loop count in par[0]");
        assert_eq!(call.par[1], 1_000, "interval echoed in par[1]");
        assert_eq!(call.discriminant, 3);
        // Drift-free cadence: fire N lands on the N·interval grid slot.
        assert_eq!(at.raw(), 1_000 * (n as u32 + 1));
    }
    assert_eq!(sched.pending_timers(), 0, "budget exhausted, timer gone");
}

#[test]
fn pause_shifts_the_fire_by_the_paused_duration() {
    let (mut sched, mut host, mut store) = harness();
    sched
        .set_rules_timer(&host, 1, 1_000, 1, MonotonicMs(0))
        .unwrap();

    // Run to t=250, pause (750ms remain), idle until t=400, resume.
    run_until(&mut sched, &mut host, &mut store, 250, 50);
    sched.pause_rules_timer(1, MonotonicMs(250)).unwrap();
    assert_eq!(sched.timer_deadline(TimerId::Rules { index: 1 }), None);

    run_until(&mut sched, &mut host, &mut store, 400, 50);
    assert!(host.calls_with(FunctionCode::RulesTimerFire).is_empty());

    sched.resume_rules_timer(1, MonotonicMs(400)).unwrap();
    assert_eq!(
        sched.timer_deadline(TimerId::Rules { index: 1 }),
        Some(MonotonicMs(1_150)),
        "remaining 750ms re-anchored at the resume tick"
    );

    run_until(&mut sched, &mut host, &mut store, 2_000, 50);
    let fires = host.calls_with(FunctionCode::RulesTimerFire);
    assert_eq!(fires.len(), 1);
    assert_eq!(fires[0].0, MonotonicMs(1_150));
}

#[test]
fn rescheduling_a_plugin_timer_replaces_the_pending_fire() {
    let (mut sched, mut host, mut store) = harness();
    sched.schedule_plugin_task_timer(7, 2, 50, [9, 0, 0, 0, 0], Some(3), MonotonicMs(0));
    sched.schedule_plugin_task_timer(7, 2, 500, [9, 0, 0, 0, 0], Some(3), MonotonicMs(0));
    assert_eq!(sched.pending_timers(), 1);

    run_until(&mut sched, &mut host, &mut store, 1_000, 10);

    let fires = host.calls_with(FunctionCode::PluginTimerIn);
    assert_eq!(fires.len(), 1, "replacement cancels the 50ms fire");
    let (at, call) = fires[0];
    assert_eq!(*at, MonotonicMs(500));
    assert_eq!(call.discriminant, 7);
    assert_eq!(call.param, 2);
    assert_eq!(call.par[0], 9);
    assert_eq!(call.task, Some(3));
}

#[test]
fn event_queue_is_serviced_once_per_window_under_full_timer_load() {
    let (mut sched, mut host, mut store) = harness();
    for n in 0..5 {
        sched.queue_system_event(QueueEvent {
            id: TimerId::SystemEvent,
            payload: EventPayload::from_text(format!("event {n}")),
        });
    }

    // Two seconds of back-to-back timer work: a GPIO timer is re-armed
    // due-immediately on every pass, so events never run as idle filler.
    let mut now = MonotonicMs(0);
    let mut serviced = Vec::new();
    while now.raw() < 2_000 {
        now = now.plus_ms(10);
        host.now = now;
        sched.schedule_gpio_timer(GpioKind::Internal, 1, 1, 0, now);
        if let DriveOutcome::EventServiced(_) = sched.drive(now, &mut host, &mut store) {
            serviced.push(now);
        }
    }

    // 500ms window over 2s means at least four guaranteed services.
    assert!(
        serviced.len() >= 4,
        "expected >= 4 event services in 2s, got {} at {serviced:?}",
        serviced.len()
    );
    for pair in serviced.windows(2) {
        let gap = pair[1].delta_ms(pair[0]);
        assert!(gap <= 510, "no event waits longer than one window: {gap}ms");
    }
    // FIFO order survives the interleaving.
    let texts: Vec<&str> = host
        .calls_with(FunctionCode::SystemEvent)
        .iter()
        .map(|(_, c)| c.text.as_str())
        .collect();
    assert_eq!(&texts[..2], &["event 0", "event 1"]);
}

#[test]
fn postmortem_record_names_the_last_dispatched_work() {
    let (mut sched, mut host, mut store) = harness();
    sched.schedule_gpio_timer(GpioKind::Internal, 4, 1, 50, MonotonicMs(0));
    sched
        .set_rules_timer(&host, 2, 200, 1, MonotonicMs(0))
        .unwrap();

    run_until(&mut sched, &mut host, &mut store, 300, 10);

    // The rules fire at 200 is the most recent dispatch on record.
    let text = flexnode::diagnostics::render_last_dispatch(&store).unwrap();
    assert!(text.contains("rules timer #2"), "got: {text}");
}

#[test]
fn infinite_rules_timer_keeps_firing_with_growing_ordinals() {
    let (mut sched, mut host, mut store) = harness();
    sched
        .set_rules_timer(&host, 5, 500, -1, MonotonicMs(0))
        .unwrap();

    run_until(&mut sched, &mut host, &mut store, 3_000, 25);

    let fires = host.calls_with(FunctionCode::RulesTimerFire);
    assert_eq!(fires.len(), 6);
    let ordinals: Vec<i32> = fires.iter().map(|(_, c)| c.par[0]).collect();
    assert_eq!(ordinals, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(
        sched.pending_timers(),
        1,
        "infinite timer stays armed after the run"
    );
}
