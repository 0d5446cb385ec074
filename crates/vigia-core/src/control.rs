//! Control channel: typed messages carried as real-time signals.
//!
//! Higher layers speak [`ControlMessage`]. Only this module knows that the
//! transport is a pair of real-time signals with an integer payload.

use crate::types::{DumpLevel, LogLevel};

/// The two reserved control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    /// Level change, `SIGRTMIN`.
    Level,
    /// Dump request, `SIGRTMIN + 1`.
    Dump,
}

impl ControlSignal {
    /// Both control signals.
    pub const ALL: [Self; 2] = [Self::Level, Self::Dump];

    /// Signal number, resolved at runtime from `SIGRTMIN`.
    #[must_use]
    pub fn number(self) -> libc::c_int {
        match self {
            Self::Level => libc::SIGRTMIN(),
            Self::Dump => libc::SIGRTMIN() + 1,
        }
    }

    /// Short name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Dump => "dump",
        }
    }
}

/// A discrete control instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Change the current log level.
    SetLevel(LogLevel),
    /// Produce a memory-map dump.
    RequestDump(DumpLevel),
}

impl ControlMessage {
    /// Signal and payload that carry this message.
    #[must_use]
    pub const fn encode(self) -> (ControlSignal, i32) {
        match self {
            Self::SetLevel(level) => (ControlSignal::Level, level.as_raw()),
            Self::RequestDump(level) => (ControlSignal::Dump, level.as_raw()),
        }
    }

    /// Decodes a delivered payload; `None` for values outside the signal's
    /// domain. Signal-safe.
    #[must_use]
    pub const fn decode(signal: ControlSignal, payload: i32) -> Option<Self> {
        match signal {
            ControlSignal::Level => match LogLevel::from_raw(payload) {
                Some(level) => Some(Self::SetLevel(level)),
                None => None,
            },
            ControlSignal::Dump => match DumpLevel::from_raw(payload) {
                Some(level) => Some(Self::RequestDump(level)),
                None => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signal_numbers_are_distinct_realtime() {
        let level = ControlSignal::Level.number();
        let dump = ControlSignal::Dump.number();
        assert_eq!(level, libc::SIGRTMIN());
        assert_eq!(dump, level + 1);
        assert!(dump <= libc::SIGRTMAX());
    }

    #[test]
    fn test_encode_level() {
        let (sig, payload) = ControlMessage::SetLevel(LogLevel::Off).encode();
        assert_eq!(sig, ControlSignal::Level);
        assert_eq!(payload, -1);
    }

    #[test]
    fn test_encode_dump() {
        let (sig, payload) = ControlMessage::RequestDump(DumpLevel::Full).encode();
        assert_eq!(sig, ControlSignal::Dump);
        assert_eq!(payload, 3);
    }

    #[test]
    fn test_decode_rejects_cross_domain() {
        // -1 is a level, never a dump
        assert_eq!(ControlMessage::decode(ControlSignal::Dump, -1), None);
        // 3 is a dump level, never a log level
        assert_eq!(ControlMessage::decode(ControlSignal::Level, 3), None);
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(idx in 0usize..8) {
            let message = if idx < 4 {
                ControlMessage::SetLevel(LogLevel::ALL[idx])
            } else {
                ControlMessage::RequestDump(DumpLevel::ALL[idx - 4])
            };
            let (sig, payload) = message.encode();
            prop_assert_eq!(ControlMessage::decode(sig, payload), Some(message));
        }

        #[test]
        fn prop_decode_never_panics(payload in any::<i32>()) {
            let _ = ControlMessage::decode(ControlSignal::Level, payload);
            let _ = ControlMessage::decode(ControlSignal::Dump, payload);
        }
    }
}
