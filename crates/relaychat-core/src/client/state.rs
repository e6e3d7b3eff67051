//! Lifecycle of one client connection

use std::fmt;

use thiserror::Error;

/// Where a client connection is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registering,
    SelectingGroup,
    Chatting { group: String },
    /// Final; no transition leaves it
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Registering => write!(f, "registering"),
            Self::SelectingGroup => write!(f, "selecting group"),
            Self::Chatting { group } => write!(f, "chatting in {}", group),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot go from {from} to {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Enforces the legal order of [`SessionState`]s
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// The chat group, while chatting
    pub fn group(&self) -> Option<&str> {
        match &self.state {
            SessionState::Chatting { group } => Some(group.as_str()),
            _ => None,
        }
    }

    fn allowed(from: &SessionState, to: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (from, to),
            (Connecting, Registering)
                | (Registering, SelectingGroup)
                | (SelectingGroup, Chatting { .. })
                | (Chatting { .. }, SelectingGroup)
        ) || (*from != Terminated && *to == Terminated)
    }

    pub fn transition(&mut self, to: SessionState) -> Result<(), TransitionError> {
        if !Self::allowed(&self.state, &to) {
            return Err(TransitionError {
                from: self.state.clone(),
                to,
            });
        }
        tracing::debug!("session state: {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Move to `Terminated` unless already there
    pub fn terminate(&mut self) {
        if !self.is_terminated() {
            tracing::debug!("session state: {} -> terminated", self.state);
            self.state = SessionState::Terminated;
        }
    }
}
