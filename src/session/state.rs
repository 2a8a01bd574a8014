//! Explicit state machine for the generative-audio session.
//!
//! Making the transitions a table (instead of ad hoc boolean flags) keeps
//! illegal states unrepresentable and illegal moves loggable.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Error,
    Closed,
}

impl SessionState {
    /// Exhaustive transition table.
    ///
    /// `Error` and `Closed` both feed back into `Connecting` for the
    /// auto-reconnect path; `Closed` is only final when the owner stops the
    /// session and drops the manager.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Closed)
                | (Connected, Streaming)
                | (Connected, Error)
                | (Connected, Closed)
                | (Streaming, Error)
                | (Streaming, Closed)
                | (Error, Connecting)
                | (Error, Closed)
                | (Closed, Connecting)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Streaming)
    }
}
