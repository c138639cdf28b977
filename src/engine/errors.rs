//! Session Error Taxonomy
//!
//! Every failure a caller can recover from. Internal invariant violations
//! (a round open with no owning session, an index past the question list)
//! are programming errors and panic via `debug_assert!`/`unreachable!`
//! rather than appearing here.

use serde::{Serialize, Deserialize};

/// Errors returned by session engine operations.
///
/// All variants are validation failures the caller maps to a user-facing
/// message; none indicate corrupted server state. The engine never retries
/// on the caller's behalf: a [`SessionError::DuplicateAnswer`] is not
/// converted into an update, and a stale command is rejected rather than
/// silently absorbed so clients can detect their own retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionError {
    /// Command is not valid in the session's current state.
    #[error("Command not valid in current session state")]
    InvalidTransition,

    /// No live session matches the given id or join code.
    #[error("Session not found")]
    SessionNotFound,

    /// Session has already left the waiting state; joining is closed.
    #[error("Session already started")]
    SessionAlreadyStarted,

    /// Session has ended; no further commands are accepted.
    #[error("Session has ended")]
    SessionEnded,

    /// Display name is empty after trimming or exceeds the length limit.
    #[error("Invalid display name")]
    InvalidName,

    /// Participant is not a member of this session's roster.
    #[error("Unknown participant")]
    UnknownParticipant,

    /// Answers are no longer accepted for this round.
    #[error("Round is closed")]
    RoundClosed,

    /// Participant already answered this round; first answer wins.
    #[error("Answer already submitted for this round")]
    DuplicateAnswer,

    /// Selected option index is outside the question's option range.
    #[error("Option index out of range")]
    InvalidOption,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SessionError::DuplicateAnswer.to_string(),
            "Answer already submitted for this round"
        );
        assert_eq!(SessionError::RoundClosed.to_string(), "Round is closed");
    }

    #[test]
    fn test_error_serialization() {
        let json = serde_json::to_string(&SessionError::InvalidTransition).unwrap();
        assert_eq!(json, "\"invalid_transition\"");

        let parsed: SessionError = serde_json::from_str("\"session_ended\"").unwrap();
        assert_eq!(parsed, SessionError::SessionEnded);
    }
}
