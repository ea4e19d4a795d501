//! Scheduler configuration parameters
//!
//! All tunable parameters for the dispatch core. Values can be
//! overridden via the host's persisted settings before the scheduler is
//! constructed; the scheduler itself never touches storage.

use serde::{Deserialize, Serialize};

/// Core scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    // --- Power ---
    /// Eco mode: when set, idle scheduler passes report a non-zero
    /// suggested wait so the outer loop may sleep. When clear, the idle
    /// hint is always zero and the loop spins at full responsiveness.
    pub eco_mode: bool,

    // --- Fairness ---
    /// Maximum interval (ms) between successive services of the system
    /// event queue, even under back-to-back timer load.
    pub watchdog_window_ms: u32,

    // --- Idle ---
    /// Upper bound (ms) on the suggested idle wait, so the outer loop
    /// keeps re-polling ISR latches and external input at a bounded rate
    /// even when the earliest timer is far in the future.
    pub idle_wait_max_ms: u32,

    // --- Rules timers ---
    /// Recurring rules timers that fall further behind than this many
    /// intervals re-synchronise to `now + interval` instead of bursting
    /// catch-up fires.
    pub rules_resync_slack_intervals: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            eco_mode: true,
            watchdog_window_ms: 500,
            idle_wait_max_ms: 100,
            rules_resync_slack_intervals: 1,
        }
    }
}
