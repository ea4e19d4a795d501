//! Port traits — the boundary between the scheduler core and the host firmware.
//!
//! ```text
//!   Host adapter ──▶ Port trait ──▶ Scheduler (core)
//! ```
//!
//! The host (drivers, plugin registry, network stack, storage) implements
//! these traits; the dispatch core calls through them and never touches
//! hardware or flash directly, so the whole core runs unmodified in
//! host-side tests with mock adapters.
//!
//! Failure is always data: a callback that could not be handled reports
//! `handled = false`, a storage miss is a typed error. Nothing here may
//! panic across the boundary.

use crate::scheduler::id::{Category, GpioKind};

// ───────────────────────────────────────────────────────────────
// Callback port (core → plugin/task/controller code)
// ───────────────────────────────────────────────────────────────

/// Which entry point of the host's dispatch table a fire maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// Fixed housekeeping cadence tick.
    IntervalTick,
    /// One-shot plugin timer routed through its owning task.
    PluginTimerIn,
    /// One-shot plugin timer addressed to the device alone.
    PluginOnlyTimerIn,
    /// Periodic sensor-poll cycle.
    TaskPoll,
    /// A rules timer elapsed; the host runs the user script.
    RulesTimerFire,
    /// A queued best-effort system event.
    SystemEvent,
}

/// One external callback invocation, as the host sees it.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub category: Category,
    /// Category-specific discriminant: device, task, or timer index.
    pub discriminant: u16,
    pub function: FunctionCode,
    /// Sub-parameter distinguishing concurrent timers on one device
    /// (plugin timers only), zero otherwise.
    pub param: u8,
    /// Generic integer parameters from the timer payload (zeroed when
    /// the timer carried none). Rules fires put the 1-based loop count
    /// in `par[0]` and the interval in `par[1]`.
    pub par: [i32; 5],
    /// Owning task, when the payload referenced one.
    pub task: Option<u8>,
    /// Text payload for system events, empty otherwise.
    pub text: String,
    /// Raw buffer for system events, empty otherwise.
    pub bytes: Vec<u8>,
}

impl CallbackRequest {
    pub(crate) fn bare(category: Category, discriminant: u16, function: FunctionCode) -> Self {
        Self {
            category,
            discriminant,
            function,
            param: 0,
            par: [0; 5],
            task: None,
            text: String::new(),
            bytes: Vec::new(),
        }
    }
}

/// Result of one callback invocation.
#[derive(Debug, Clone, Default)]
pub struct CallbackOutcome {
    /// False when no plugin/task claimed the call. Never an error.
    pub handled: bool,
    /// Free-form output (rule engine log lines etc.); may be empty.
    pub output: String,
}

impl CallbackOutcome {
    pub fn handled() -> Self {
        Self {
            handled: true,
            output: String::new(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Scheduler host (everything the dispatch core calls out to)
// ───────────────────────────────────────────────────────────────

/// The host side of the dispatch core.
///
/// One trait rather than five because every implementation the firmware
/// has (and every mock the tests have) is a single object owning the
/// plugin registry, the task table and the pin drivers together.
pub trait SchedulerHost {
    /// Dispatch a fired timer or event into plugin/task/controller code.
    fn invoke(&mut self, request: &CallbackRequest) -> CallbackOutcome;

    /// Hardware pin write. Used only by the GPIO handler.
    fn write_pin(&mut self, expander: GpioKind, pin: u8, value: u8);

    /// Whether a task slot is configured and enabled.
    fn is_valid_task(&self, index: u8) -> bool;

    /// Whether a device (plugin instance) exists.
    fn is_valid_device(&self, index: u8) -> bool;

    /// Whether a rules-timer index is within the host's configured range.
    fn is_valid_timer_index(&self, index: u8) -> bool;

    /// Configured poll period for a task, `None` when polling is disabled.
    fn task_poll_interval_ms(&self, index: u8) -> Option<u32>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (diagnostics ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the postmortem dispatch record.
///
/// Keys are namespaced to prevent collisions between subsystems. Writes
/// MUST be atomic — no partial records on power loss (the ESP-IDF NVS
/// API guarantees this natively; in-memory mocks achieve it trivially).
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
