//! Scheduler dispatch core.
//!
//! One [`Scheduler`] instance owns the deadline queue, the best-effort
//! event queue, the per-timer payload table, and the last-known pin
//! state map. The outer loop calls [`Scheduler::drive`] repeatedly; each
//! pass dispatches at most one unit of work, so the loop stays
//! responsive to external input between fires.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       drive(now)                             │
//! │                                                              │
//! │  watchdog window elapsed? ──yes──▶ service one system event  │
//! │         │ no                                                 │
//! │         ▼                                                    │
//! │  TimerQueue.next_due(now)                                    │
//! │         │                      │                             │
//! │       Due(id)                Idle ──▶ one event as filler,   │
//! │         │                            else Idle{max_wait}     │
//! │         ▼                                                    │
//! │  persist id (postmortem) ──▶ Category Handler                │
//! │                               │ re-arms via schedule_*       │
//! │                               ▼                              │
//! │                         host.invoke() / host.write_pin()     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Priority: timers first; the event queue runs as idle filler, but the
//! watchdog window guarantees it is serviced at least once per window
//! even under back-to-back timer load. `drive()` runs to completion and
//! is never re-entered from a handler — handlers scheduling new work is
//! the normal re-arm path.

pub mod id;
pub mod queue;
pub mod rules;

use std::collections::HashMap;

use heapless::FnvIndexMap;
use log::{debug, info};

use crate::clock::MonotonicMs;
use crate::config::SchedulerConfig;
use crate::diagnostics;
use crate::error::{Result, ScheduleError};
use crate::events::{QueueEvent, SystemEventQueue};
use crate::ports::{CallbackRequest, FunctionCode, SchedulerHost, StoragePort};

use id::{Category, GpioKind, IntervalKind, TimerId};
use queue::{IdleStats, NextDue, TimerQueue};
use rules::{FireOutcome, RulesTimerState};

/// Tracked pins for introspection (power of two, FnvIndexMap requirement).
const PIN_STATE_CAPACITY: usize = 64;

/// Interval cadences resync after falling one period behind, same rule
/// as rules timers but not user-tunable.
const INTERVAL_RESYNC_SLACK: u32 = 1;

// ───────────────────────────────────────────────────────────────
// Payload table
// ───────────────────────────────────────────────────────────────

/// Auxiliary record for timers that need more than their id.
///
/// Created alongside the queue entry; consumed by the handler on fire —
/// except for a recurring rules timer, whose state survives across
/// fires.
#[derive(Debug, Clone)]
pub enum TimerPayload {
    /// Plugin timer parameters.
    Plugin { par: [i32; 5], task: Option<u8> },
    /// Rules-timer state machine.
    Rules(RulesTimerState),
}

/// What one `drive()` pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// A due timer was dispatched to its category handler.
    Dispatched(TimerId),
    /// One system event was serviced (watchdog or idle filler).
    EventServiced(TimerId),
    /// Nothing to do. With eco mode enabled the host may yield for up to
    /// `max_wait_ms`; with it disabled the hint is always zero.
    Idle { max_wait_ms: u32 },
}

// ───────────────────────────────────────────────────────────────
// Scheduler
// ───────────────────────────────────────────────────────────────

/// The dispatch core. See the module docs for the drive cycle.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: TimerQueue,
    events: SystemEventQueue,
    payloads: HashMap<TimerId, TimerPayload>,
    /// Last value written per (expander, pin), for introspection endpoints.
    pin_states: FnvIndexMap<(u8, u8), u8, PIN_STATE_CAPACITY>,
    /// Last tick the system event queue was serviced (or found empty).
    last_event_service: MonotonicMs,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, now: MonotonicMs) -> Self {
        let queue = TimerQueue::new(config.idle_wait_max_ms);
        Self {
            config,
            queue,
            events: SystemEventQueue::new(),
            payloads: HashMap::new(),
            pin_states: FnvIndexMap::new(),
            last_event_service: now,
        }
    }

    // ── Drive cycle ───────────────────────────────────────────

    /// Run one scheduler pass. Dispatches at most one unit of work.
    ///
    /// The diagnostics `store` receives the id of every dispatched timer
    /// before its handler runs (best-effort, postmortem only).
    pub fn drive(
        &mut self,
        now: MonotonicMs,
        host: &mut dyn SchedulerHost,
        store: &mut dyn StoragePort,
    ) -> DriveOutcome {
        // Starvation guard: under back-to-back timer load the event queue
        // still gets one service per watchdog window.
        if now.delta_ms(self.last_event_service) >= self.config.watchdog_window_ms as i32 {
            self.last_event_service = now;
            if let Some(event) = self.events.pop() {
                let event_id = event.id;
                self.dispatch_system_event(event, host);
                return DriveOutcome::EventServiced(event_id);
            }
        }

        match self.queue.next_due(now) {
            NextDue::Due { id, deadline } => {
                diagnostics::persist_last_dispatch(store, id);
                self.dispatch(id, deadline, now, host);
                DriveOutcome::Dispatched(id)
            }
            NextDue::Idle { max_wait_ms } => {
                // Timers get priority; the event queue fills idle passes.
                if let Some(event) = self.events.pop() {
                    self.last_event_service = now;
                    let event_id = event.id;
                    self.dispatch_system_event(event, host);
                    DriveOutcome::EventServiced(event_id)
                } else {
                    self.last_event_service = now;
                    DriveOutcome::Idle {
                        max_wait_ms: if self.config.eco_mode { max_wait_ms } else { 0 },
                    }
                }
            }
        }
    }

    // ── Schedule API (one entry point per work category) ──────

    /// Arm every housekeeping cadence at boot.
    pub fn arm_housekeeping(&mut self, now: MonotonicMs) {
        for kind in IntervalKind::ALL {
            self.queue
                .schedule(TimerId::Interval(kind), now.plus_ms(kind.period_ms()));
        }
        info!("housekeeping cadences armed ({} timers)", IntervalKind::ALL.len());
    }

    /// (Re-)arm a single housekeeping cadence at `now + period`.
    pub fn schedule_interval(&mut self, kind: IntervalKind, now: MonotonicMs) {
        self.queue
            .schedule(TimerId::Interval(kind), now.plus_ms(kind.period_ms()));
    }

    /// One-shot plugin timer routed through its owning task.
    ///
    /// Re-scheduling the same (device, param) replaces the pending fire.
    /// Validation happens at fire time: a device or task deleted between
    /// scheduling and firing makes the fire a silent no-op.
    pub fn schedule_plugin_task_timer(
        &mut self,
        device: u8,
        param: u8,
        delay_ms: u32,
        par: [i32; 5],
        task: Option<u8>,
        now: MonotonicMs,
    ) {
        let timer_id = TimerId::PluginTask { device, param };
        self.payloads
            .insert(timer_id, TimerPayload::Plugin { par, task });
        self.queue.schedule(timer_id, now.plus_ms(delay_ms));
    }

    /// One-shot plugin timer addressed to the device alone.
    pub fn schedule_plugin_only_timer(
        &mut self,
        device: u8,
        param: u8,
        delay_ms: u32,
        par: [i32; 5],
        now: MonotonicMs,
    ) {
        let timer_id = TimerId::PluginOnly { device, param };
        self.payloads
            .insert(timer_id, TimerPayload::Plugin { par, task: None });
        self.queue.schedule(timer_id, now.plus_ms(delay_ms));
    }

    /// Start (or move) the periodic poll cycle for a task.
    pub fn schedule_task_device_timer(&mut self, task: u8, delay_ms: u32, now: MonotonicMs) {
        self.queue
            .schedule(TimerId::TaskDevice { task }, now.plus_ms(delay_ms));
    }

    /// Delayed pin write. Self-describing: no payload is stored.
    pub fn schedule_gpio_timer(
        &mut self,
        expander: GpioKind,
        pin: u8,
        value: u8,
        delay_ms: u32,
        now: MonotonicMs,
    ) {
        self.queue.schedule(
            TimerId::Gpio {
                expander,
                pin,
                value,
            },
            now.plus_ms(delay_ms),
        );
    }

    /// Enqueue a best-effort system event (payload moved in).
    pub fn queue_system_event(&mut self, event: QueueEvent) {
        self.events.push(event);
    }

    // ── Rules timers ──────────────────────────────────────────

    /// Create or replace rules timer `index`.
    ///
    /// `recurring_count < 0` recurs forever; `0` arms a timer that
    /// consumes its tick without external effect.
    pub fn set_rules_timer(
        &mut self,
        host: &dyn SchedulerHost,
        index: u8,
        interval_ms: u32,
        recurring_count: i32,
        now: MonotonicMs,
    ) -> Result<()> {
        if !host.is_valid_timer_index(index) {
            return Err(ScheduleError::InvalidTimerIndex);
        }
        let timer_id = TimerId::Rules { index };
        self.payloads.insert(
            timer_id,
            TimerPayload::Rules(RulesTimerState::new(interval_ms, recurring_count)),
        );
        self.queue.schedule(timer_id, now.plus_ms(interval_ms));
        info!(
            "rules timer #{index} set: every {interval_ms}ms, count {recurring_count}"
        );
        Ok(())
    }

    /// Pause an armed rules timer, capturing the remaining time.
    ///
    /// Rejected once the deadline has passed — the fire must happen.
    pub fn pause_rules_timer(&mut self, index: u8, now: MonotonicMs) -> Result<()> {
        let timer_id = TimerId::Rules { index };
        let state = match self.payloads.get_mut(&timer_id) {
            Some(TimerPayload::Rules(state)) => state,
            _ => return Err(ScheduleError::UnknownTimer),
        };
        if state.is_paused() {
            return Err(ScheduleError::NotArmed);
        }
        let deadline = self
            .queue
            .get_deadline(timer_id)
            .ok_or(ScheduleError::NotArmed)?;
        let remaining = deadline.delta_ms(now);
        if remaining <= 0 {
            return Err(ScheduleError::AlreadyExpired);
        }
        state.enter_paused(remaining as u32);
        self.queue.remove(timer_id);
        debug!("rules timer #{index} paused with {remaining}ms left");
        Ok(())
    }

    /// Resume a paused rules timer at `now + remainder`.
    pub fn resume_rules_timer(&mut self, index: u8, now: MonotonicMs) -> Result<()> {
        let timer_id = TimerId::Rules { index };
        let state = match self.payloads.get_mut(&timer_id) {
            Some(TimerPayload::Rules(state)) => state,
            _ => return Err(ScheduleError::UnknownTimer),
        };
        if !state.is_paused() {
            return Err(ScheduleError::NotPaused);
        }
        let remainder = state.leave_paused();
        self.queue.schedule(timer_id, now.plus_ms(remainder));
        debug!("rules timer #{index} resumed, fires in {remainder}ms");
        Ok(())
    }

    // ── Introspection ─────────────────────────────────────────

    /// Last value written to a pin by the GPIO handler.
    pub fn last_pin_state(&self, expander: GpioKind, pin: u8) -> Option<u8> {
        self.pin_states.get(&(expander as u8, pin)).copied()
    }

    /// Deadline of a pending timer, if one is queued.
    pub fn timer_deadline(&self, timer_id: TimerId) -> Option<MonotonicMs> {
        self.queue.get_deadline(timer_id)
    }

    pub fn pending_timers(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn stats(&self) -> &IdleStats {
        self.queue.stats()
    }

    /// Reset running statistics (called by the external reporter).
    pub fn reset_stats(&mut self) {
        self.queue.reset_stats();
    }

    // ── Category handlers ─────────────────────────────────────

    fn dispatch(
        &mut self,
        timer_id: TimerId,
        deadline: MonotonicMs,
        now: MonotonicMs,
        host: &mut dyn SchedulerHost,
    ) {
        match timer_id {
            TimerId::Interval(kind) => self.handle_interval(kind, deadline, now, host),
            TimerId::PluginTask { .. } | TimerId::PluginOnly { .. } => {
                self.handle_plugin_timer(timer_id, host);
            }
            TimerId::TaskDevice { task } => self.handle_task_device(task, deadline, now, host),
            TimerId::Gpio {
                expander,
                pin,
                value,
            } => self.handle_gpio(expander, pin, value, host),
            TimerId::Rules { index } => self.handle_rules(index, deadline, now, host),
            TimerId::SystemEvent | TimerId::RebootMarker { .. } => {
                debug!("non-schedulable id {timer_id} found in timer queue — dropped");
            }
        }
    }

    /// Housekeeping cadence: re-arm first (drift-free), then run.
    fn handle_interval(
        &mut self,
        kind: IntervalKind,
        deadline: MonotonicMs,
        now: MonotonicMs,
        host: &mut dyn SchedulerHost,
    ) {
        let period = kind.period_ms();
        let next = rules::next_deadline(deadline, now, period, INTERVAL_RESYNC_SLACK);
        self.queue.schedule(TimerId::Interval(kind), next);

        let request =
            CallbackRequest::bare(Category::Interval, kind as u16, FunctionCode::IntervalTick);
        let _ = host.invoke(&request);
    }

    /// Plugin timers are strictly one-shot: the payload is removed
    /// *before* the callback runs, so a duplicate fire cannot re-consume
    /// it. A deleted device or task makes the fire a silent no-op.
    fn handle_plugin_timer(&mut self, timer_id: TimerId, host: &mut dyn SchedulerHost) {
        let (device, param, function) = match timer_id {
            TimerId::PluginTask { device, param } => {
                (device, param, FunctionCode::PluginTimerIn)
            }
            TimerId::PluginOnly { device, param } => {
                (device, param, FunctionCode::PluginOnlyTimerIn)
            }
            _ => return,
        };

        let Some(payload) = self.payloads.remove(&timer_id) else {
            debug!("{timer_id} fired without payload — ignored");
            return;
        };
        let TimerPayload::Plugin { par, task } = payload else {
            debug!("{timer_id} carried a non-plugin payload — ignored");
            return;
        };

        if !host.is_valid_device(device) {
            debug!("{timer_id}: device gone — dropped");
            return;
        }
        if let Some(task_index) = task {
            if !host.is_valid_task(task_index) {
                debug!("{timer_id}: task gone — dropped");
                return;
            }
        }

        let mut request =
            CallbackRequest::bare(timer_id.category(), u16::from(device), function);
        request.param = param;
        request.par = par;
        request.task = task;
        let outcome = host.invoke(&request);
        if !outcome.handled {
            debug!("{timer_id}: callback unhandled");
        }
    }

    /// Task poll cycle: re-arm first at the configured period (or not at
    /// all when polling is disabled), then invoke the poll callback.
    fn handle_task_device(
        &mut self,
        task: u8,
        deadline: MonotonicMs,
        now: MonotonicMs,
        host: &mut dyn SchedulerHost,
    ) {
        if !host.is_valid_task(task) {
            debug!("task poll #{task}: task gone — dropped");
            return;
        }

        if let Some(period) = host.task_poll_interval_ms(task) {
            if period > 0 {
                let next = rules::next_deadline(deadline, now, period, INTERVAL_RESYNC_SLACK);
                self.queue.schedule(TimerId::TaskDevice { task }, next);
            }
        }

        let request =
            CallbackRequest::bare(Category::TaskDevice, u16::from(task), FunctionCode::TaskPoll);
        let _ = host.invoke(&request);
    }

    /// Delayed pin write: one-shot, no payload; everything is in the id.
    fn handle_gpio(
        &mut self,
        expander: GpioKind,
        pin: u8,
        value: u8,
        host: &mut dyn SchedulerHost,
    ) {
        host.write_pin(expander, pin, value);
        if self
            .pin_states
            .insert((expander as u8, pin), value)
            .is_err()
        {
            debug!("pin-state map full — {expander:?} pin {pin} not tracked");
        }
    }

    /// Rules timer: decide re-arm/removal *before* running the user
    /// script, so script side effects never influence drift avoidance.
    fn handle_rules(
        &mut self,
        index: u8,
        deadline: MonotonicMs,
        now: MonotonicMs,
        host: &mut dyn SchedulerHost,
    ) {
        let timer_id = TimerId::Rules { index };
        let (interval, outcome) = match self.payloads.get_mut(&timer_id) {
            Some(TimerPayload::Rules(state)) => (state.interval_ms(), state.advance()),
            Some(_) => {
                debug!("rules timer #{index} carried a non-rules payload — ignored");
                return;
            }
            None => {
                debug!("rules timer #{index} fired without payload — ignored");
                return;
            }
        };

        match outcome {
            FireOutcome::RunAndRearm { ordinal } => {
                let next = rules::next_deadline(
                    deadline,
                    now,
                    interval,
                    self.config.rules_resync_slack_intervals,
                );
                self.queue.schedule(timer_id, next);
                self.invoke_rules(index, ordinal, interval, host);
            }
            FireOutcome::RunAndRemove { ordinal } => {
                self.payloads.remove(&timer_id);
                self.invoke_rules(index, ordinal, interval, host);
            }
            FireOutcome::SilentRemove => {
                self.payloads.remove(&timer_id);
            }
        }
    }

    fn invoke_rules(&mut self, index: u8, ordinal: u32, interval: u32, host: &mut dyn SchedulerHost) {
        let mut request = CallbackRequest::bare(
            Category::Rules,
            u16::from(index),
            FunctionCode::RulesTimerFire,
        );
        request.par[0] = ordinal as i32;
        request.par[1] = interval as i32;
        let _ = host.invoke(&request);
    }

    fn dispatch_system_event(&mut self, event: QueueEvent, host: &mut dyn SchedulerHost) {
        let mut request = CallbackRequest::bare(
            event.id.category(),
            event.id.discriminant(),
            FunctionCode::SystemEvent,
        );
        request.text = event.payload.text;
        request.bytes = event.payload.bytes;
        let _ = host.invoke(&request);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
