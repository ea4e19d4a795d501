//! Monotonic millisecond time base.
//!
//! The whole scheduler runs off a wrapping 32-bit millisecond counter
//! (rolls over every ~49.7 days). Deadlines are compared with
//! signed-difference-of-unsigned arithmetic, so a rollover between two
//! nearby instants never produces an incorrect ordering.
//!
//! - **`target_os = "espidf"`** — [`SystemClock`] wraps
//!   `esp_timer_get_time()` from the ESP-IDF high-resolution timer.
//! - **`not(target_os = "espidf")`** — uses `std::time::Instant` for
//!   host-side testing and simulation.

use core::fmt;

/// A point on the wrapping millisecond counter.
///
/// Two instants are only meaningfully comparable when they lie within
/// half the counter range (~24.8 days) of each other, which every timer
/// in the system satisfies by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MonotonicMs(pub u32);

impl MonotonicMs {
    pub const fn new(ms: u32) -> Self {
        Self(ms)
    }

    /// Raw counter value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// This instant advanced by `ms`, wrapping.
    pub const fn plus_ms(self, ms: u32) -> Self {
        Self(self.0.wrapping_add(ms))
    }

    /// Signed distance `self - other` in milliseconds.
    ///
    /// Positive when `self` is later than `other`, correct across the
    /// counter rollover.
    pub const fn delta_ms(self, other: MonotonicMs) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// True once `self` (read as "now") has reached or passed `deadline`.
    pub const fn has_reached(self, deadline: MonotonicMs) -> bool {
        self.delta_ms(deadline) >= 0
    }

    /// Milliseconds remaining from `self` until `deadline`, zero if the
    /// deadline has already passed.
    pub const fn until(self, deadline: MonotonicMs) -> u32 {
        let d = deadline.delta_ms(self);
        if d <= 0 { 0 } else { d as u32 }
    }
}

impl fmt::Display for MonotonicMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port + platform adapter
// ───────────────────────────────────────────────────────────────

/// Read-side time port: the outer loop obtains `now` here and passes it
/// into the scheduler, which never reads a clock itself.
pub trait ClockPort {
    /// Current value of the wrapping millisecond counter.
    fn now(&self) -> MonotonicMs;

    /// Cooperative idle wait for at most `max_ms`.
    ///
    /// May return early (e.g. on external input); the scheduler treats
    /// the wait purely as a power-saving hint, never as a delay source.
    fn sleep(&self, max_ms: u32);
}

/// Platform clock.
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl ClockPort for SystemClock {
    #[cfg(target_os = "espidf")]
    fn now(&self) -> MonotonicMs {
        // esp_timer counts microseconds in an i64; truncating to u32
        // milliseconds yields exactly the wrapping counter we schedule on.
        let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() } as u64;
        MonotonicMs((us / 1_000) as u32)
    }

    #[cfg(not(target_os = "espidf"))]
    fn now(&self) -> MonotonicMs {
        MonotonicMs(self.start.elapsed().as_millis() as u32)
    }

    fn sleep(&self, max_ms: u32) {
        // On ESP-IDF std::thread::sleep lowers to vTaskDelay, which is the
        // cooperative yield we want; the idle task gets to run and the
        // SoC may enter light sleep if configured.
        std::thread::sleep(std::time::Duration::from_millis(u64::from(max_ms)));
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
