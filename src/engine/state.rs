//! Session state machine
//!
//! Session states: STARTING → READING → {DRAINING →} TERMINATED

use std::fmt;

/// Lifecycle of one protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake not yet sent
    Starting,
    /// Reader loop consuming operations, workers possibly in flight
    Reading,
    /// `close` was read; in-flight workers are finishing
    Draining,
    /// All workers finished
    Terminated,
}

impl SessionState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        match (self, target) {
            (SessionState::Starting, SessionState::Reading) => true,
            // Handshake could not be written
            (SessionState::Starting, SessionState::Terminated) => true,

            (SessionState::Reading, SessionState::Draining) => true,
            // End of input or fatal error
            (SessionState::Reading, SessionState::Terminated) => true,

            (SessionState::Draining, SessionState::Terminated) => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Reading => "reading",
            SessionState::Draining => "draining",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(SessionState::Starting.can_transition_to(SessionState::Reading));
        assert!(SessionState::Reading.can_transition_to(SessionState::Draining));
        assert!(SessionState::Reading.can_transition_to(SessionState::Terminated));
        assert!(SessionState::Draining.can_transition_to(SessionState::Terminated));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!SessionState::Starting.can_transition_to(SessionState::Draining));
        assert!(!SessionState::Draining.can_transition_to(SessionState::Reading));
        assert!(!SessionState::Terminated.can_transition_to(SessionState::Reading));
        assert!(!SessionState::Reading.can_transition_to(SessionState::Reading));
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Draining.to_string(), "draining");
    }
}
