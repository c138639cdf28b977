//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease,
//! with optional binary (bincode) for flat payloads.
//!
//! Identifiers cross the wire as UUID strings; the engine's byte ids are
//! parsed out with the helpers below.

use serde::{Serialize, Deserialize};

use crate::engine::errors::SessionError;
use crate::engine::events::EventRecord;
use crate::engine::quiz::QuizId;
use crate::engine::roster::{ParticipantId, RankEntry};
use crate::engine::session::SessionId;

/// Parse a UUID string into 16 raw bytes.
fn parse_id(s: &str) -> Option<[u8; 16]> {
    uuid::Uuid::parse_str(s).ok().map(|u| u.into_bytes())
}

/// Format 16 raw bytes as a UUID string.
fn format_id(bytes: &[u8; 16]) -> String {
    uuid::Uuid::from_bytes(*bytes).to_string()
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Host: create a session for a quiz.
    CreateSession(CreateSessionRequest),

    /// Participant: join a waiting session by code.
    Join(JoinRequest),

    /// Host: start the quiz.
    Start {
        /// Session to start (UUID string).
        session_id: String,
    },

    /// Participant: answer the current question.
    SubmitAnswer(SubmitAnswerRequest),

    /// Host: close the current round and reveal the answer.
    Reveal {
        /// Target session (UUID string).
        session_id: String,
    },

    /// Host: advance to the next round (or end after the last).
    Next {
        /// Target session (UUID string).
        session_id: String,
    },

    /// Host: end the session now.
    End {
        /// Target session (UUID string).
        session_id: String,
    },

    /// Fetch the current leaderboard.
    Leaderboard {
        /// Target session (UUID string).
        session_id: String,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Session creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Quiz to run (UUID string).
    pub quiz_id: String,
}

impl CreateSessionRequest {
    /// Parse the quiz id.
    pub fn quiz_id_bytes(&self) -> Option<QuizId> {
        parse_id(&self.quiz_id)
    }
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// 6-digit join code shown on the host screen.
    pub code: String,
    /// Desired display name.
    pub name: String,
}

/// Answer submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerRequest {
    /// Session (UUID string).
    pub session_id: String,
    /// Participant (UUID string).
    pub participant_id: String,
    /// Question being answered; a stale id is rejected.
    pub question_id: u32,
    /// Selected option index.
    pub option: u8,
}

impl SubmitAnswerRequest {
    /// Parse the session id.
    pub fn session_id_bytes(&self) -> Option<SessionId> {
        parse_id(&self.session_id)
    }

    /// Parse the participant id.
    pub fn participant_id_bytes(&self) -> Option<ParticipantId> {
        parse_id(&self.participant_id).map(ParticipantId::new)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session created; share the code.
    SessionCreated(SessionCreatedInfo),

    /// Join succeeded.
    Joined(JoinedInfo),

    /// Answer accepted.
    AnswerAccepted {
        /// Question answered.
        question_id: u32,
        /// Points earned.
        points: u32,
    },

    /// Host command applied; resulting state arrives as events.
    Ack {
        /// Which command this acknowledges.
        command: String,
    },

    /// Session event fan-out.
    Event(EventRecord),

    /// Leaderboard snapshot.
    Leaderboard {
        /// Ranked standings.
        ranking: Vec<RankEntry>,
    },

    /// Command failed.
    Error(ProtocolError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall time, ms since epoch.
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Session creation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedInfo {
    /// Session id (UUID string).
    pub session_id: String,
    /// Allocated 6-digit join code.
    pub join_code: String,
    /// Quiz title.
    pub quiz_title: String,
    /// Number of rounds.
    pub total_rounds: u32,
}

/// Join result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedInfo {
    /// Session id (UUID string).
    pub session_id: String,
    /// Assigned participant id (UUID string).
    pub participant_id: String,
    /// Quiz title.
    pub quiz_title: String,
}

impl JoinedInfo {
    /// Build from engine ids.
    pub fn new(session_id: &SessionId, participant_id: &ParticipantId, quiz_title: String) -> Self {
        Self {
            session_id: format_id(session_id),
            participant_id: format_id(participant_id.as_bytes()),
            quiz_title,
        }
    }
}

/// Error reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Command not valid in the session's current state.
    InvalidTransition,
    /// No live session for that id or code.
    SessionNotFound,
    /// Session already started; joining is closed.
    SessionAlreadyStarted,
    /// Session has ended.
    SessionEnded,
    /// Display name rejected.
    InvalidName,
    /// Participant not in this session.
    UnknownParticipant,
    /// Round no longer accepts answers.
    RoundClosed,
    /// Already answered this round.
    DuplicateAnswer,
    /// Option index out of range.
    InvalidOption,
    /// Message could not be parsed or referenced a malformed id.
    InvalidInput,
}

impl From<SessionError> for ErrorCode {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidTransition => ErrorCode::InvalidTransition,
            SessionError::SessionNotFound => ErrorCode::SessionNotFound,
            SessionError::SessionAlreadyStarted => ErrorCode::SessionAlreadyStarted,
            SessionError::SessionEnded => ErrorCode::SessionEnded,
            SessionError::InvalidName => ErrorCode::InvalidName,
            SessionError::UnknownParticipant => ErrorCode::UnknownParticipant,
            SessionError::RoundClosed => ErrorCode::RoundClosed,
            SessionError::DuplicateAnswer => ErrorCode::DuplicateAnswer,
            SessionError::InvalidOption => ErrorCode::InvalidOption,
        }
    }
}

impl ProtocolError {
    /// Build the wire error for an engine failure.
    pub fn from_session_error(err: SessionError) -> Self {
        Self {
            code: err.into(),
            message: err.to_string(),
        }
    }

    /// Build an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl SubmitAnswerRequest {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
