//! Best-effort system events and the ISR handoff primitive.
//!
//! Two very different producers feed the main loop:
//!
//! - Cooperative code (handlers, the host's network stack) enqueues
//!   [`QueueEvent`]s into the [`SystemEventQueue`], a strict FIFO the
//!   scheduler services between timer fires and at least once per
//!   watchdog window.
//! - Interrupt context (pin-change counters) writes an [`IsrPulse`]
//!   latch. That is the one genuine concurrency boundary in the design:
//!   the write happens inside a critical section so the multi-word
//!   snapshot can be read back without tearing.
//!
//! ```text
//! ┌─────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Handlers    │────▶│ SystemEventQueue  │────▶│              │
//! │ Net stack   │────▶│ (FIFO, moved)     │     │  drive()     │
//! ├─────────────┤     ├───────────────────┤     │  main loop   │
//! │ GPIO ISR    │────▶│ IsrPulse latch    │────▶│              │
//! └─────────────┘     └───────────────────┘     └──────────────┘
//! ```

use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::VecDeque;

use crate::clock::MonotonicMs;
use crate::scheduler::id::TimerId;

// ───────────────────────────────────────────────────────────────
// System event queue (main-loop owned, strict FIFO)
// ───────────────────────────────────────────────────────────────

/// Heavier event payload: free-form text (rule events, controller
/// messages) and/or a raw buffer. Moved at enqueue and at dispatch so
/// large buffers are never duplicated.
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    pub text: String,
    pub bytes: Vec<u8>,
}

impl EventPayload {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bytes: Vec::new(),
        }
    }
}

/// One queued best-effort event.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub id: TimerId,
    pub payload: EventPayload,
}

/// Unbounded FIFO of non-deadline work.
///
/// Exclusively owned by the scheduler and mutated only on the main
/// thread — ISR producers go through [`IsrPulse`], never through here.
#[derive(Default)]
pub struct SystemEventQueue {
    events: VecDeque<QueueEvent>,
    high_water: usize,
}

impl SystemEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue, taking ownership of the payload.
    pub fn push(&mut self, event: QueueEvent) {
        self.events.push_back(event);
        if self.events.len() > self.high_water {
            self.high_water = self.events.len();
        }
    }

    /// Dequeue the oldest event, moving the payload out.
    pub fn pop(&mut self) -> Option<QueueEvent> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Deepest the queue has been (diagnostics only).
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

// ───────────────────────────────────────────────────────────────
// ISR → main loop latch
// ───────────────────────────────────────────────────────────────

/// Single-producer (ISR) / single-consumer (main loop) pulse latch.
///
/// The producer increments a counter and stamps the tick of the last
/// pulse; both words are written inside a critical section so the
/// consumer's snapshot is coherent. This is deliberately *not* a general
/// lock — one writer, one reader, two words.
pub struct IsrPulse {
    count: AtomicU32,
    last_tick: AtomicU32,
}

impl IsrPulse {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            last_tick: AtomicU32::new(0),
        }
    }

    /// Record one pulse. Safe to call from interrupt context.
    pub fn record(&self, now: MonotonicMs) {
        critical_section::with(|_| {
            self.count.fetch_add(1, Ordering::Relaxed);
            self.last_tick.store(now.raw(), Ordering::Relaxed);
        });
    }

    /// Coherent (count, last-pulse-tick) snapshot without clearing.
    pub fn snapshot(&self) -> (u32, MonotonicMs) {
        critical_section::with(|_| {
            (
                self.count.load(Ordering::Relaxed),
                MonotonicMs(self.last_tick.load(Ordering::Relaxed)),
            )
        })
    }

    /// Snapshot and reset the counter (main-loop consumer only).
    pub fn take(&self) -> (u32, MonotonicMs) {
        critical_section::with(|_| {
            (
                self.count.swap(0, Ordering::Relaxed),
                MonotonicMs(self.last_tick.load(Ordering::Relaxed)),
            )
        })
    }
}

impl Default for IsrPulse {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn event(index: u8, text: &str) -> QueueEvent {
        QueueEvent {
            id: TimerId::Rules { index },
            payload: EventPayload::from_text(text),
        }
    }

    #[test]
    fn fifo_order_is_strict() {
        let mut q = SystemEventQueue::new();
        q.push(event(1, "first"));
        q.push(event(2, "second"));
        q.push(event(3, "third"));

        assert_eq!(q.pop().unwrap().payload.text, "first");
        assert_eq!(q.pop().unwrap().payload.text, "second");
        assert_eq!(q.pop().unwrap().payload.text, "third");
        assert!(q.pop().is_none());
    }

    #[test]
    fn payload_moves_through_untouched() {
        let mut q = SystemEventQueue::new();
        let mut ev = event(1, "buffered");
        ev.payload.bytes = vec![0xAA; 1024];
        q.push(ev);

        let out = q.pop().unwrap();
        assert_eq!(out.payload.bytes.len(), 1024);
        assert_eq!(out.payload.text, "buffered");
    }

    #[test]
    fn high_water_tracks_depth() {
        let mut q = SystemEventQueue::new();
        q.push(event(1, "a"));
        q.push(event(2, "b"));
        let _ = q.pop();
        q.push(event(3, "c"));
        assert_eq!(q.high_water(), 2);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn pulse_latch_counts_and_stamps() {
        let latch = IsrPulse::new();
        latch.record(MonotonicMs(10));
        latch.record(MonotonicMs(25));
        latch.record(MonotonicMs(31));

        let (count, last) = latch.snapshot();
        assert_eq!(count, 3);
        assert_eq!(last, MonotonicMs(31));

        let (taken, _) = latch.take();
        assert_eq!(taken, 3);
        let (after, _) = latch.snapshot();
        assert_eq!(after, 0);
    }
}
