//! Runtime lifecycle state.
//!
//! `#[repr(u8)]` for compact storage; the protocol spelling returned by
//! `as_str` is the exact token used in `STATUS:` responses.

use serde::{Deserialize, Serialize};

/// Authoritative lifecycle state of the runtime.
///
/// Only one state is active at any time; every transition is performed
/// under the lifecycle mutex and logged at INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RuntimeState {
    /// No program artifact is available.
    Empty = 0,
    /// A program is being loaded and bound.
    Init = 1,
    /// The scan engine is executing cycles.
    Running = 2,
    /// A program was stopped (or never started) and may be (re)started.
    Stopped = 3,
    /// A load or bind failure; a new start attempt may clear it.
    Error = 4,
}

impl RuntimeState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::Init),
            2 => Some(Self::Running),
            3 => Some(Self::Stopped),
            4 => Some(Self::Error),
            _ => None,
        }
    }

    /// Protocol spelling, as reported by `STATUS:`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u8_round_trip() {
        for v in 0..=4u8 {
            let state = RuntimeState::from_u8(v).unwrap();
            assert_eq!(state as u8, v);
        }
        assert_eq!(RuntimeState::from_u8(5), None);
        assert_eq!(RuntimeState::from_u8(255), None);
    }

    #[test]
    fn protocol_spelling() {
        assert_eq!(RuntimeState::Running.as_str(), "RUNNING");
        assert_eq!(RuntimeState::Empty.as_str(), "EMPTY");
        assert_eq!(format!("{}", RuntimeState::Stopped), "STOPPED");
    }

    #[test]
    fn default_is_stopped() {
        assert_eq!(RuntimeState::default(), RuntimeState::Stopped);
    }
}
