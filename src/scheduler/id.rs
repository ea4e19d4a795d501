//! Timer identity and the mixed-id codec.
//!
//! Internally every unit of deferred work is a [`TimerId`] — an explicit
//! tagged union, so dispatch logic never does bit surgery. The packed
//! `u32` form (4-bit category in the high bits, 28-bit sub-key below)
//! exists only at the diagnostics boundary, where a single integer must
//! survive a reboot in the postmortem store.
//!
//! Invariant: two ids with equal (category, sub-key) denote *the same
//! timer* — scheduling a new deadline for an existing id replaces the
//! prior entry, never duplicates it. `TimerId` derives `Eq + Hash`, so
//! the queue and payload table get this for free.

use core::fmt;

const CATEGORY_SHIFT: u32 = 28;
const SUBKEY_MASK: u32 = 0x0FFF_FFFF;

/// Work category discriminant (closed set, 4 bits in packed form).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Category {
    /// Fixed housekeeping cadence.
    Interval = 1,
    /// One-shot plugin timer routed through a task.
    PluginTask = 2,
    /// One-shot plugin timer with no task association.
    PluginOnly = 3,
    /// Periodic sensor-poll cycle for one task.
    TaskDevice = 4,
    /// Delayed GPIO write, fully self-describing.
    Gpio = 5,
    /// User-visible rules timer.
    Rules = 6,
    /// Best-effort system event (queue-only, never in the timer queue).
    SystemEvent = 7,
    /// Diagnostic marker persisted before a deliberate restart.
    RebootMarker = 15,
}

impl Category {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Interval),
            2 => Some(Self::PluginTask),
            3 => Some(Self::PluginOnly),
            4 => Some(Self::TaskDevice),
            5 => Some(Self::Gpio),
            6 => Some(Self::Rules),
            7 => Some(Self::SystemEvent),
            15 => Some(Self::RebootMarker),
            _ => None,
        }
    }
}

/// Housekeeping cadences.
///
/// The slower ones exist purely as safety nets for subsystems that
/// normally re-arm at a shorter, dynamic interval of their own — they
/// guarantee forward progress if that subsystem's re-arm logic fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IntervalKind {
    /// 20 ms fast tick (button debounce, pulse aggregation).
    Fast = 0,
    /// 100 ms medium tick (sensor sampling safety net).
    Medium = 1,
    /// 250 ms slow tick (display / status refresh).
    Slow = 2,
    /// 2 s protocol retry cadence (controller reconnect attempts).
    LinkRetry = 3,
    /// 30 s background sweep (stats flush, connection health).
    Background = 4,
}

impl IntervalKind {
    /// Fixed period for this cadence.
    pub const fn period_ms(self) -> u32 {
        match self {
            Self::Fast => 20,
            Self::Medium => 100,
            Self::Slow => 250,
            Self::LinkRetry => 2_000,
            Self::Background => 30_000,
        }
    }

    /// Every cadence, for boot-time arming.
    pub const ALL: [IntervalKind; 5] = [
        Self::Fast,
        Self::Medium,
        Self::Slow,
        Self::LinkRetry,
        Self::Background,
    ];

    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Fast),
            1 => Some(Self::Medium),
            2 => Some(Self::Slow),
            3 => Some(Self::LinkRetry),
            4 => Some(Self::Background),
            _ => None,
        }
    }
}

/// GPIO expander selector for delayed pin writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GpioKind {
    /// SoC-internal pin.
    Internal = 0,
    /// MCP23017 I2C expander.
    Mcp23017 = 1,
    /// PCF8574 I2C expander.
    Pcf8574 = 2,
}

impl GpioKind {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Internal),
            1 => Some(Self::Mcp23017),
            2 => Some(Self::Pcf8574),
            _ => None,
        }
    }
}

/// Identity of one unit of deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Fixed housekeeping cadence.
    Interval(IntervalKind),
    /// One-shot plugin timer associated with a task's device.
    PluginTask { device: u8, param: u8 },
    /// One-shot plugin timer addressed to the device alone.
    PluginOnly { device: u8, param: u8 },
    /// Periodic poll cycle for one task slot.
    TaskDevice { task: u8 },
    /// Delayed pin write; carries everything the handler needs.
    Gpio { expander: GpioKind, pin: u8, value: u8 },
    /// User-visible rules timer (1-based index).
    Rules { index: u8 },
    /// Best-effort system event marker.
    SystemEvent,
    /// Deliberate-restart marker with a reason code.
    RebootMarker { reason: u8 },
}

impl TimerId {
    /// Host-facing discriminant: the index the host's dispatch table is
    /// keyed by (device, task, timer index, cadence…).
    pub const fn discriminant(self) -> u16 {
        match self {
            Self::Interval(kind) => kind as u16,
            Self::PluginTask { device, .. } | Self::PluginOnly { device, .. } => device as u16,
            Self::TaskDevice { task } => task as u16,
            Self::Gpio { pin, .. } => pin as u16,
            Self::Rules { index } => index as u16,
            Self::SystemEvent => 0,
            Self::RebootMarker { reason } => reason as u16,
        }
    }

    /// Category discriminant of this id.
    pub const fn category(self) -> Category {
        match self {
            Self::Interval(_) => Category::Interval,
            Self::PluginTask { .. } => Category::PluginTask,
            Self::PluginOnly { .. } => Category::PluginOnly,
            Self::TaskDevice { .. } => Category::TaskDevice,
            Self::Gpio { .. } => Category::Gpio,
            Self::Rules { .. } => Category::Rules,
            Self::SystemEvent => Category::SystemEvent,
            Self::RebootMarker { .. } => Category::RebootMarker,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Packed codec — diagnostics/serialization boundary only
// ───────────────────────────────────────────────────────────────

/// Pack an id into its single-integer wire form.
///
/// Sub-key layouts (collision-free within each category):
/// - Interval: cadence discriminant
/// - PluginTask / PluginOnly: `(param << 8) | device`
/// - TaskDevice: task index
/// - Gpio: `(value << 16) | (pin << 8) | expander`
/// - Rules: timer index
/// - RebootMarker: reason code
pub fn encode(id: TimerId) -> u32 {
    let (category, subkey): (Category, u32) = match id {
        TimerId::Interval(kind) => (Category::Interval, kind as u32),
        TimerId::PluginTask { device, param } => {
            (Category::PluginTask, (u32::from(param) << 8) | u32::from(device))
        }
        TimerId::PluginOnly { device, param } => {
            (Category::PluginOnly, (u32::from(param) << 8) | u32::from(device))
        }
        TimerId::TaskDevice { task } => (Category::TaskDevice, u32::from(task)),
        TimerId::Gpio { expander, pin, value } => (
            Category::Gpio,
            (u32::from(value) << 16) | (u32::from(pin) << 8) | expander as u32,
        ),
        TimerId::Rules { index } => (Category::Rules, u32::from(index)),
        TimerId::SystemEvent => (Category::SystemEvent, 0),
        TimerId::RebootMarker { reason } => (Category::RebootMarker, u32::from(reason)),
    };
    ((category as u32) << CATEGORY_SHIFT) | (subkey & SUBKEY_MASK)
}

/// Unpack a wire-form id. `None` for unknown categories or malformed
/// sub-keys — a stale postmortem record must never panic the decoder.
pub fn decode(raw: u32) -> Option<TimerId> {
    let subkey = raw & SUBKEY_MASK;
    match Category::from_u8((raw >> CATEGORY_SHIFT) as u8)? {
        Category::Interval => IntervalKind::from_u8(subkey as u8).map(TimerId::Interval),
        Category::PluginTask => Some(TimerId::PluginTask {
            device: subkey as u8,
            param: (subkey >> 8) as u8,
        }),
        Category::PluginOnly => Some(TimerId::PluginOnly {
            device: subkey as u8,
            param: (subkey >> 8) as u8,
        }),
        Category::TaskDevice => Some(TimerId::TaskDevice { task: subkey as u8 }),
        Category::Gpio => Some(TimerId::Gpio {
            expander: GpioKind::from_u8(subkey as u8)?,
            pin: (subkey >> 8) as u8,
            value: (subkey >> 16) as u8,
        }),
        Category::Rules => Some(TimerId::Rules { index: subkey as u8 }),
        Category::SystemEvent => Some(TimerId::SystemEvent),
        Category::RebootMarker => Some(TimerId::RebootMarker { reason: subkey as u8 }),
    }
}

/// Human-readable rendering of a packed id for postmortem logs.
///
/// Used only by diagnostics rendering — never by dispatch.
pub fn decode_for_humans(raw: u32) -> String {
    match decode(raw) {
        Some(TimerId::Interval(kind)) => {
            format!("interval {:?} ({}ms)", kind, kind.period_ms())
        }
        Some(TimerId::PluginTask { device, param }) => {
            format!("plugin-task timer dev={} par={}", device, param)
        }
        Some(TimerId::PluginOnly { device, param }) => {
            format!("plugin-only timer dev={} par={}", device, param)
        }
        Some(TimerId::TaskDevice { task }) => format!("task poll #{}", task),
        Some(TimerId::Gpio { expander, pin, value }) => {
            format!("gpio {:?} pin={} value={}", expander, pin, value)
        }
        Some(TimerId::Rules { index }) => format!("rules timer #{}", index),
        Some(TimerId::SystemEvent) => "system event".to_string(),
        Some(TimerId::RebootMarker { reason }) => {
            format!("intended reboot (reason {})", reason)
        }
        None => format!("unknown id 0x{:08X}", raw),
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", decode_for_humans(encode(*self)))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
