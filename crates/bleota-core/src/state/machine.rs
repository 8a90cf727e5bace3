//! Update session lifecycle.

use std::fmt;

/// Lifecycle state of one update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    HandshakeSent,
    Transferring,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
    /// Link released after a terminal state.
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::HandshakeSent => write!(f, "HANDSHAKE_SENT"),
            SessionState::Transferring => write!(f, "TRANSFERRING"),
            SessionState::Completed => write!(f, "COMPLETED"),
            SessionState::Failed => write!(f, "FAILED"),
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

impl SessionState {
    /// Check if this is a terminal outcome of the update.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Check if the update may still fail from this state.
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Connected
                | SessionState::HandshakeSent
                | SessionState::Transferring
        )
    }

    /// Allowed edges of the lifecycle. There is no way back.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Connecting)
            | (Connecting, Connected)
            | (Connected, HandshakeSent)
            | (HandshakeSent, Transferring)
            | (Transferring, Completed) => true,
            (from, Failed) => from.can_fail(),
            (from, Disconnected) => from.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks the current state and the terminal outcome.
#[derive(Debug, Default)]
pub struct SessionMachine {
    state: SessionState,
    outcome: Option<SessionState>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed or Failed once reached; survives the move to Disconnected.
    pub fn outcome(&self) -> Option<SessionState> {
        self.outcome
    }

    /// Transition to a new state. Returns the previous state, or `None`
    /// if the edge is not part of the lifecycle (state left unchanged).
    pub fn goto_state(&mut self, next: SessionState) -> Option<SessionState> {
        let from = self.state;
        if !from.can_transition_to(next) {
            tracing::warn!(from = %from, to = %next, "Rejected state transition");
            return None;
        }
        tracing::info!(from = %from, to = %next, "State transition");
        self.state = next;
        if next.is_terminal() {
            self.outcome = Some(next);
        }
        Some(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path() {
        let mut m = SessionMachine::new();
        for next in [
            Connecting,
            Connected,
            HandshakeSent,
            Transferring,
            Completed,
            Disconnected,
        ] {
            assert!(m.goto_state(next).is_some(), "edge to {next}");
        }
        assert_eq!(m.state(), Disconnected);
        assert_eq!(m.outcome(), Some(Completed));
    }

    #[test]
    fn test_failure_from_active_states_only() {
        for from in [Connecting, Connected, HandshakeSent, Transferring] {
            assert!(from.can_transition_to(Failed));
        }
        for from in [Idle, Completed, Failed, Disconnected] {
            assert!(!from.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_no_reentry() {
        let mut m = SessionMachine::new();
        m.goto_state(Connecting);
        m.goto_state(Failed);
        m.goto_state(Disconnected);

        assert!(m.goto_state(Connecting).is_none());
        assert!(m.goto_state(Idle).is_none());
        assert_eq!(m.state(), Disconnected);
        assert_eq!(m.outcome(), Some(Failed));
    }

    #[test]
    fn test_cannot_skip_handshake() {
        let mut m = SessionMachine::new();
        m.goto_state(Connecting);
        m.goto_state(Connected);
        assert!(m.goto_state(Transferring).is_none());
        assert_eq!(m.state(), Connected);
    }
}
