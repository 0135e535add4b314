//! Connection State Machine
//!
//! ```text
//! Idle ─► Resolving ─► Connecting ─► Connected ─► NotifyActive ─► Relaying
//!   │                    ▲                                            │
//!   └────────────────────┘ (address supplied)                         ▼
//!                                                                 Stopping ─► Disconnected
//! ```
//!
//! Every non-terminal state may also jump straight to `Stopping` or
//! `Disconnected`. `Disconnected` is terminal.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Resolving,
    Connecting,
    Connected,
    NotifyActive,
    Relaying,
    Stopping,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }

    /// States in which a link write may be issued
    pub fn allows_writes(self) -> bool {
        matches!(self, Self::Connected | Self::NotifyActive | Self::Relaying)
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Disconnected => true,
            Stopping => self != Stopping,
            Resolving => self == Idle,
            Connecting => matches!(self, Idle | Resolving),
            Connected => self == Connecting,
            NotifyActive => self == Connected,
            Relaying => self == NotifyActive,
            Idle => false,
        }
    }

    pub fn transition(self, next: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Resolving => "Resolving",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::NotifyActive => "NotifyActive",
            Self::Relaying => "Relaying",
            Self::Stopping => "Stopping",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    const ALL: [ConnectionState; 8] = [
        Idle,
        Resolving,
        Connecting,
        Connected,
        NotifyActive,
        Relaying,
        Stopping,
        Disconnected,
    ];

    #[test]
    fn test_happy_path_is_accepted() {
        let path = [Resolving, Connecting, Connected, NotifyActive, Relaying, Stopping, Disconnected];
        let mut state = Idle;
        for next in path {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, Disconnected);
    }

    #[test]
    fn test_address_supplied_skips_resolving() {
        assert!(Idle.can_transition_to(Connecting));
    }

    #[test]
    fn test_disconnected_reachable_from_every_live_state() {
        for state in ALL.iter().copied().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(Disconnected), "{state}");
        }
    }

    #[test]
    fn test_disconnected_is_terminal() {
        for next in ALL {
            assert!(!Disconnected.can_transition_to(next));
        }
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        assert_eq!(
            Idle.transition(Relaying),
            Err(InvalidTransition { from: Idle, to: Relaying })
        );
        assert!(!Connecting.can_transition_to(NotifyActive));
        assert!(!Relaying.can_transition_to(Connected));
        assert!(!Stopping.can_transition_to(Stopping));
    }

    #[test]
    fn test_write_window() {
        let writable: Vec<_> = ALL.iter().copied().filter(|s| s.allows_writes()).collect();
        assert_eq!(writable, vec![Connected, NotifyActive, Relaying]);
    }
}
