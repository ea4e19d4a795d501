//! Rules-timer state machine.
//!
//! User scripts own a small set of indexed timers with recurrence,
//! pause and resume. The payload lives here; the queue entry lives in
//! [`TimerQueue`](super::queue::TimerQueue). States:
//!
//! ```text
//!  Idle ──set──▶ Armed ──pause──▶ Paused
//!                 ▲  │              │
//!                 │  └──fire────┐   │
//!                 └───resume────┼───┘
//!                               ▼
//!              re-armed (recurring) or deleted (one-shot)
//! ```
//!
//! Re-arming is drift-free: the next deadline is *previous target +
//! interval*, not *now + interval*, so N fires land within one
//! granularity of start + N·interval. A timer that has fallen more than
//! the configured slack behind resynchronises to now + interval instead
//! of bursting catch-up fires.

use crate::clock::MonotonicMs;

/// Remaining recurrence budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopBudget {
    /// Fire forever (requested with a negative count).
    Infinite,
    /// This many fires left. Zero consumes its tick without external effect.
    Remaining(u32),
}

impl LoopBudget {
    /// Interpret the user-facing count: negative = infinite.
    pub fn from_count(count: i32) -> Self {
        if count < 0 {
            Self::Infinite
        } else {
            Self::Remaining(count as u32)
        }
    }
}

/// What the handler must do for one fire, decided *before* the external
/// callback runs so script side effects cannot influence re-arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Invoke the callback with this 1-based fire ordinal, then re-arm.
    RunAndRearm { ordinal: u32 },
    /// Invoke the callback, then delete the payload (budget exhausted).
    RunAndRemove { ordinal: u32 },
    /// Consume the tick without external effect and delete the payload.
    SilentRemove,
}

/// Payload for one rules timer.
#[derive(Debug, Clone, Copy)]
pub struct RulesTimerState {
    interval_ms: u32,
    budget: LoopBudget,
    /// Completed fires; the callback sees this as a 1-based ordinal.
    fires: u32,
    /// Time left on the interval, captured at pause; zero while armed.
    remainder_ms: u32,
    paused: bool,
}

impl RulesTimerState {
    pub fn new(interval_ms: u32, recurring_count: i32) -> Self {
        Self {
            interval_ms,
            budget: LoopBudget::from_count(recurring_count),
            fires: 0,
            remainder_ms: 0,
            paused: false,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Fires completed so far.
    pub fn fire_count(&self) -> u32 {
        self.fires
    }

    /// Armed → Paused. The caller has already removed the queue entry and
    /// verified `remainder_ms > 0`.
    pub fn enter_paused(&mut self, remainder_ms: u32) {
        self.paused = true;
        self.remainder_ms = remainder_ms;
    }

    /// Paused → Armed. Returns the remainder to schedule at `now + r`.
    pub fn leave_paused(&mut self) -> u32 {
        self.paused = false;
        core::mem::take(&mut self.remainder_ms)
    }

    /// Consume one fire from the budget and report what to do with it.
    pub fn advance(&mut self) -> FireOutcome {
        match self.budget {
            LoopBudget::Infinite => {
                self.fires += 1;
                FireOutcome::RunAndRearm { ordinal: self.fires }
            }
            LoopBudget::Remaining(0) => FireOutcome::SilentRemove,
            LoopBudget::Remaining(1) => {
                self.budget = LoopBudget::Remaining(0);
                self.fires += 1;
                FireOutcome::RunAndRemove { ordinal: self.fires }
            }
            LoopBudget::Remaining(n) => {
                self.budget = LoopBudget::Remaining(n - 1);
                self.fires += 1;
                FireOutcome::RunAndRearm { ordinal: self.fires }
            }
        }
    }
}

/// Drift-free next deadline for a recurring timer that just fired.
///
/// `prev_target` is the deadline the fire was scheduled for. When the
/// computed target is more than `slack_intervals` whole intervals in the
/// past, snap to `now + interval` instead.
pub fn next_deadline(
    prev_target: MonotonicMs,
    now: MonotonicMs,
    interval_ms: u32,
    slack_intervals: u32,
) -> MonotonicMs {
    let next = prev_target.plus_ms(interval_ms);
    let lag = now.delta_ms(next);
    let slack = interval_ms.saturating_mul(slack_intervals.max(1));
    if lag > slack as i32 {
        now.plus_ms(interval_ms)
    } else {
        next
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
