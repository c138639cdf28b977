//! Session Events
//!
//! Immutable records emitted by session mutations, fanned out to every
//! subscriber of the session through the gateway. Clients reconstruct
//! their entire view of a session from this stream, so each variant
//! carries everything needed to render the corresponding screen.

use serde::{Serialize, Deserialize};

use crate::engine::roster::{ParticipantId, RankEntry};
use crate::engine::session::{SessionId, SessionState};

/// Event payload.
///
/// `RoundOpened` deliberately omits the correct option index: participants
/// must not learn it before the round closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A participant was admitted to the waiting session.
    ParticipantJoined {
        /// New participant.
        participant_id: ParticipantId,
        /// Their display name.
        display_name: String,
        /// Roster size after the join.
        participant_count: u32,
    },

    /// The session moved between lifecycle states.
    SessionStateChanged {
        /// State before the transition.
        from: SessionState,
        /// State after the transition.
        to: SessionState,
        /// Current round index, if a round is in play.
        round_index: Option<u32>,
    },

    /// A question round opened for answers.
    RoundOpened {
        /// Zero-based round index.
        question_index: u32,
        /// Question id, echoed back on submissions.
        question_id: u32,
        /// Question text.
        text: String,
        /// Answer options in display order.
        options: Vec<String>,
        /// Time allowed, in milliseconds.
        time_limit_ms: u64,
    },

    /// The live tally changed while a round is open.
    AnswerTallyUpdated {
        /// Round index the tally belongs to.
        question_index: u32,
        /// Answer count per option index.
        counts: Vec<u32>,
        /// Number of real answers recorded so far.
        answered_count: u32,
    },

    /// A round closed; the correct answer is now public.
    RoundClosed {
        /// Round index.
        question_index: u32,
        /// Index of the correct option.
        correct_option: u8,
        /// Final answer count per option index.
        counts: Vec<u32>,
    },

    /// The session ended; final standings.
    SessionEnded {
        /// Leaderboard: score descending, ties by join order.
        final_ranking: Vec<RankEntry>,
    },
}

/// A session event with its origin and emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Monotonic emission time in milliseconds.
    pub timestamp_ms: u64,
    /// Event payload.
    pub event: SessionEvent,
}

impl EventRecord {
    /// Create a record.
    pub fn new(session_id: SessionId, timestamp_ms: u64, event: SessionEvent) -> Self {
        Self { session_id, timestamp_ms, event }
    }
}
