//! Unified error types for the scheduler core.
//!
//! Follows embedded best practice: small `Copy` enums that every caller
//! can match exhaustively. Nothing here is fatal — a rejected operation
//! leaves the scheduler untouched and the caller decides whether to log.

use core::fmt;

/// Rejection reasons for `schedule_*` / rules-timer operations.
///
/// All variants are local and non-propagating; the scheduler never
/// aborts on any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// Rules-timer index is outside the host-validated range.
    InvalidTimerIndex,
    /// Referenced task index failed the host validator.
    InvalidTask,
    /// Referenced device index failed the host validator.
    InvalidDevice,
    /// No payload exists for the given timer (never set, or already consumed).
    UnknownTimer,
    /// Pause requested but the timer is not currently armed.
    NotArmed,
    /// Resume requested but the timer is not currently paused.
    NotPaused,
    /// Pause requested after the deadline already passed; the remaining
    /// time would be non-positive, so the fire must be allowed to happen.
    AlreadyExpired,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimerIndex => write!(f, "timer index out of range"),
            Self::InvalidTask => write!(f, "unknown task index"),
            Self::InvalidDevice => write!(f, "unknown device index"),
            Self::UnknownTimer => write!(f, "no such timer"),
            Self::NotArmed => write!(f, "timer not armed"),
            Self::NotPaused => write!(f, "timer not paused"),
            Self::AlreadyExpired => write!(f, "deadline already passed"),
        }
    }
}

/// Scheduler-wide `Result` alias.
pub type Result<T> = core::result::Result<T, ScheduleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(ScheduleError::NotArmed.to_string(), "timer not armed");
        assert_eq!(
            ScheduleError::AlreadyExpired.to_string(),
            "deadline already passed"
        );
    }
}
