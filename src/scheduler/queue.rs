//! Deadline-sorted timer queue.
//!
//! A small sorted list, not a binary heap: the pending set on a node is
//! tens of entries at most, replacement-by-id is a common operation, and
//! a linear scan keeps ordering stable for equal deadlines (first
//! scheduled fires first). Wrap-safe comparisons throughout — a deadline
//! just past the counter rollover still sorts after one just before it.

use serde::Serialize;

use crate::clock::MonotonicMs;

use super::id::TimerId;

/// One pending timer. Exclusively owned by the queue.
#[derive(Debug, Clone, Copy)]
pub struct TimerEntry {
    pub id: TimerId,
    pub deadline: MonotonicMs,
}

/// Result of asking the queue for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextDue {
    /// The earliest deadline has arrived; the entry has been popped.
    /// `deadline` is the tick it was scheduled for, which re-arming
    /// handlers use as the drift-free base for the next period.
    Due { id: TimerId, deadline: MonotonicMs },
    /// Nothing due. The caller may yield for at most `max_wait_ms`;
    /// whether to actually sleep is the caller's decision.
    Idle { max_wait_ms: u32 },
}

/// Running scheduler statistics, reset by an external periodic reporter.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IdleStats {
    /// Total milliseconds spent with nothing due.
    pub idle_ms: u64,
    /// Deepest the queue has been since the last reset.
    pub max_depth: usize,
    /// `next_due` calls since the last reset.
    pub next_due_calls: u64,
    /// Entries popped as due since the last reset.
    pub dispatched: u64,
}

impl IdleStats {
    /// JSON snapshot for the host's diagnostics endpoint.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Sorted container mapping timer ids to deadlines.
pub struct TimerQueue {
    /// Ascending by wrap-safe deadline; ties keep insertion order.
    entries: Vec<TimerEntry>,
    /// Bound on the idle wait hint.
    idle_wait_max_ms: u32,
    stats: IdleStats,
    /// Bookkeeping for idle-time accounting across `next_due` calls.
    last_poll: Option<MonotonicMs>,
    last_poll_idle: bool,
}

impl TimerQueue {
    pub fn new(idle_wait_max_ms: u32) -> Self {
        Self {
            entries: Vec::new(),
            idle_wait_max_ms,
            stats: IdleStats::default(),
            last_poll: None,
            last_poll_idle: false,
        }
    }

    /// Schedule (or re-schedule) `id` for `deadline`.
    ///
    /// Any existing entry with the same id is removed first — at most one
    /// pending fire per id, and a reschedule implicitly cancels the
    /// previous one. An empty queue skips the sorted-position scan.
    pub fn schedule(&mut self, id: TimerId, deadline: MonotonicMs) {
        self.remove(id);

        let entry = TimerEntry { id, deadline };
        if self.entries.is_empty() {
            self.entries.push(entry);
        } else {
            // First slot whose deadline is strictly later; inserting before
            // it places equal deadlines after existing ones (stable ties).
            let pos = self
                .entries
                .iter()
                .position(|e| e.deadline.delta_ms(deadline) > 0)
                .unwrap_or(self.entries.len());
            self.entries.insert(pos, entry);
        }

        if self.entries.len() > self.stats.max_depth {
            self.stats.max_depth = self.entries.len();
        }
    }

    /// Remove any pending entry for `id`. Returns whether one existed.
    pub fn remove(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Read-only deadline lookup (pause semantics need the remaining time).
    pub fn get_deadline(&self, id: TimerId) -> Option<MonotonicMs> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.deadline)
    }

    /// Pop the next due entry, or report how long the caller may idle.
    ///
    /// "Nothing due" is a normal result, not an error. Idle time between
    /// consecutive idle polls is accumulated into [`IdleStats`].
    pub fn next_due(&mut self, now: MonotonicMs) -> NextDue {
        self.stats.next_due_calls += 1;

        let result = match self.entries.first() {
            None => NextDue::Idle {
                max_wait_ms: self.idle_wait_max_ms,
            },
            Some(front) if !now.has_reached(front.deadline) => NextDue::Idle {
                max_wait_ms: now.until(front.deadline).min(self.idle_wait_max_ms),
            },
            Some(_) => {
                let entry = self.entries.remove(0);
                self.stats.dispatched += 1;
                NextDue::Due {
                    id: entry.id,
                    deadline: entry.deadline,
                }
            }
        };

        // Two consecutive idle polls mean the gap between them was idle time.
        let idle_now = matches!(result, NextDue::Idle { .. });
        if idle_now && self.last_poll_idle {
            if let Some(prev) = self.last_poll {
                let gap = now.delta_ms(prev);
                if gap > 0 {
                    self.stats.idle_ms += gap as u64;
                }
            }
        }
        self.last_poll = Some(now);
        self.last_poll_idle = idle_now;

        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &IdleStats {
        &self.stats
    }

    /// Reset the running statistics (called by the external reporter).
    pub fn reset_stats(&mut self) {
        self.stats = IdleStats::default();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
