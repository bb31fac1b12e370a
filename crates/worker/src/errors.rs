//! Worker error taxonomy.
//!
//! Each variant corresponds to one row of the error handling design: it
//! either becomes a terminal `Error` frame for the originating session, a
//! logged-only event, or (for [`WorkerError::Malformed`]) tears down the
//! whole Connection.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("No capacity")]
    NoCapacity,

    #[error("Session not found")]
    UnknownSession,

    #[error("Upstream failure")]
    UpstreamFailure,

    #[error("Inactivity timeout")]
    InputInactivity,

    #[error("Output timeout")]
    OutputInactivity,

    #[error("malformed frame")]
    Malformed,

    #[error("Internal error")]
    Internal,
}

impl WorkerError {
    /// The `Error.message` text surfaced to the client, matching spec.md
    /// §7's literal trigger wording used throughout the end-to-end
    /// scenarios.
    pub fn client_message(&self) -> &'static str {
        match self {
            WorkerError::NoCapacity => "No capacity",
            WorkerError::UnknownSession => "Session not found",
            WorkerError::UpstreamFailure => "Upstream failure",
            WorkerError::InputInactivity => "Inactivity timeout",
            WorkerError::OutputInactivity => "Output timeout",
            WorkerError::Malformed => "Malformed frame",
            WorkerError::Internal => "Internal error",
        }
    }

    /// Whether this error terminates the session it applies to.
    pub fn is_terminal_for_session(&self) -> bool {
        !matches!(self, WorkerError::UnknownSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_is_not_terminal() {
        assert!(!WorkerError::UnknownSession.is_terminal_for_session());
    }

    #[test]
    fn no_capacity_is_terminal() {
        assert!(WorkerError::NoCapacity.is_terminal_for_session());
    }

    #[test]
    fn client_messages_match_spec_wording() {
        assert_eq!(WorkerError::NoCapacity.client_message(), "No capacity");
        assert_eq!(
            WorkerError::InputInactivity.client_message(),
            "Inactivity timeout"
        );
    }
}
