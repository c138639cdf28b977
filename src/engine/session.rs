//! Quiz Session State Machine
//!
//! One run of a quiz from creation to final leaderboard. The session owns
//! its roster and the live round, validates every host and participant
//! command against the current state, and returns the event records each
//! mutation emitted so the caller can publish them in order.
//!
//! State transitions are monotonic (`Waiting -> Active -> Ended`, or
//! `Waiting -> Ended` when the host cancels) and idempotent-rejecting: a
//! command that no longer applies is an error, never silently ignored, so
//! clients can detect their own stale retries.
//!
//! All mutation happens through the per-session serialization point owned
//! by the registry; nothing here locks.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::engine::errors::SessionError;
use crate::engine::events::{EventRecord, SessionEvent};
use crate::engine::quiz::Quiz;
use crate::engine::roster::{ParticipantId, RankEntry, Roster};
use crate::engine::round::Round;

/// Unique session identifier (UUID as bytes).
pub type SessionId = [u8; 16];

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Lobby: participants may join, no round has run.
    Waiting,
    /// Quiz in progress: rounds open and close.
    Active,
    /// Terminal: leaderboard is final, no commands accepted.
    Ended,
}

/// One run of a quiz.
pub struct QuizSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// 6-digit code participants use to find this session.
    pub join_code: String,
    quiz: Arc<Quiz>,
    state: SessionState,
    current_round_index: Option<u32>,
    roster: Roster,
    round: Option<Round>,
    history: Vec<Round>,
    round_epoch: u64,
    /// Wall-clock creation time, for reporting.
    pub created_at: DateTime<Utc>,
    /// Wall-clock start time, if started.
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock end time, if ended.
    pub ended_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    /// Create a session in the waiting state.
    pub fn new(id: SessionId, join_code: String, quiz: Arc<Quiz>) -> Self {
        Self {
            id,
            join_code,
            quiz,
            state: SessionState::Waiting,
            current_round_index: None,
            roster: Roster::new(),
            round: None,
            history: Vec::new(),
            round_epoch: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The quiz being run.
    pub fn quiz(&self) -> &Arc<Quiz> {
        &self.quiz
    }

    /// Total number of rounds in this session.
    pub fn total_rounds(&self) -> u32 {
        self.quiz.round_count()
    }

    /// Index of the current round, `None` until started.
    pub fn current_round_index(&self) -> Option<u32> {
        self.current_round_index
    }

    /// The roster.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The live round (open or closed-awaiting-next), if any.
    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Retired rounds in play order, for per-question review.
    pub fn history(&self) -> &[Round] {
        &self.history
    }

    /// Round generation counter.
    ///
    /// Incremented on every round open and close. A deadline timer
    /// captures the epoch at open; by the time it fires, a differing
    /// epoch means the round it was armed for is already gone.
    pub fn round_epoch(&self) -> u64 {
        self.round_epoch
    }

    /// Admit a participant. Only valid while waiting.
    pub fn join(
        &mut self,
        display_name: &str,
        now_ms: u64,
    ) -> Result<(ParticipantId, EventRecord), SessionError> {
        match self.state {
            SessionState::Waiting => {}
            SessionState::Active => return Err(SessionError::SessionAlreadyStarted),
            SessionState::Ended => return Err(SessionError::SessionEnded),
        }

        let participant = self.roster.join(display_name, now_ms)?;
        let (id, name) = (participant.id, participant.display_name.clone());
        let record = self.record(now_ms, SessionEvent::ParticipantJoined {
            participant_id: id,
            display_name: name,
            participant_count: self.roster.len() as u32,
        });

        Ok((id, record))
    }

    /// Start the quiz: transition to `Active` and open round 0.
    ///
    /// Requires a non-empty roster and at least one question.
    pub fn start(&mut self, now_ms: u64) -> Result<Vec<EventRecord>, SessionError> {
        match self.state {
            SessionState::Waiting => {}
            SessionState::Active => return Err(SessionError::InvalidTransition),
            SessionState::Ended => return Err(SessionError::SessionEnded),
        }
        if self.roster.is_empty() || self.quiz.questions.is_empty() {
            return Err(SessionError::InvalidTransition);
        }

        self.state = SessionState::Active;
        self.started_at = Some(Utc::now());

        let changed = self.record(now_ms, SessionEvent::SessionStateChanged {
            from: SessionState::Waiting,
            to: SessionState::Active,
            round_index: Some(0),
        });
        let opened = self.open_round(0, now_ms);

        Ok(vec![changed, opened])
    }

    /// Record an answer and apply its points to the roster.
    ///
    /// Acceptance and the score increment are one step under the
    /// session's serialization point: a concurrent duplicate from the
    /// same participant sees `DuplicateAnswer` and changes nothing.
    /// Returns the points earned and the updated live tally event.
    pub fn submit_answer(
        &mut self,
        participant_id: ParticipantId,
        question_id: u32,
        selected: u8,
        now_ms: u64,
    ) -> Result<(u32, EventRecord), SessionError> {
        match self.state {
            SessionState::Active => {}
            SessionState::Waiting => return Err(SessionError::InvalidTransition),
            SessionState::Ended => return Err(SessionError::SessionEnded),
        }
        if !self.roster.contains(&participant_id) {
            return Err(SessionError::UnknownParticipant);
        }

        let round = self.round.as_mut().ok_or(SessionError::RoundClosed)?;
        if round.question_id != question_id {
            // Late submission for a question that is no longer current.
            return Err(SessionError::RoundClosed);
        }

        let points = round.submit_answer(participant_id, selected, now_ms)?;
        let (question_index, counts, answered) =
            (round.question_index, round.tally(), round.answered_count());

        self.roster.apply_points(&participant_id, points)?;

        let record = self.record(now_ms, SessionEvent::AnswerTallyUpdated {
            question_index,
            counts,
            answered_count: answered,
        });

        Ok((points, record))
    }

    /// Host reveal: close the current round and publish the answer.
    pub fn reveal(&mut self, now_ms: u64) -> Result<EventRecord, SessionError> {
        match self.state {
            SessionState::Active => {}
            SessionState::Waiting => return Err(SessionError::InvalidTransition),
            SessionState::Ended => return Err(SessionError::SessionEnded),
        }

        match self.round {
            Some(ref round) if !round.is_closed() => {}
            _ => return Err(SessionError::InvalidTransition),
        }

        Ok(self.close_current_round(now_ms))
    }

    /// Deadline timer path: close the round the given epoch was armed
    /// for.
    ///
    /// A stale fire (round already closed or retired, session ended) is a
    /// safe no-op, never an error.
    pub fn expire_round(&mut self, armed_epoch: u64, now_ms: u64) -> Option<EventRecord> {
        if self.state != SessionState::Active || self.round_epoch != armed_epoch {
            return None;
        }
        match self.round {
            Some(ref round) if !round.is_closed() => {}
            _ => return None,
        }

        Some(self.close_current_round(now_ms))
    }

    /// Advance past a closed round: open the next one, or end the session
    /// when no rounds remain.
    ///
    /// Fails with `InvalidTransition` while the current round is still
    /// open.
    pub fn next(&mut self, now_ms: u64) -> Result<Vec<EventRecord>, SessionError> {
        match self.state {
            SessionState::Active => {}
            SessionState::Waiting => return Err(SessionError::InvalidTransition),
            SessionState::Ended => return Err(SessionError::SessionEnded),
        }

        match self.round {
            Some(ref round) if round.is_closed() => {}
            _ => return Err(SessionError::InvalidTransition),
        }

        self.retire_round();

        let next_index = self.current_round_index.map_or(0, |i| i + 1);
        if next_index < self.total_rounds() {
            Ok(vec![self.open_round(next_index, now_ms)])
        } else {
            Ok(self.finish(now_ms))
        }
    }

    /// End the session from any non-terminal state.
    ///
    /// Closes an open round first (absent participants get timeout
    /// entries), then computes the final ranking.
    pub fn end(&mut self, now_ms: u64) -> Result<Vec<EventRecord>, SessionError> {
        if self.state == SessionState::Ended {
            return Err(SessionError::SessionEnded);
        }

        let mut records = Vec::new();
        if matches!(self.round, Some(ref round) if !round.is_closed()) {
            records.push(self.close_current_round(now_ms));
        }
        self.retire_round();
        records.extend(self.finish(now_ms));

        Ok(records)
    }

    /// Current leaderboard. Final once the session has ended.
    pub fn leaderboard(&self) -> Vec<RankEntry> {
        self.roster.ranking()
    }

    /// Close the live round, which must exist and be open.
    fn close_current_round(&mut self, now_ms: u64) -> EventRecord {
        let round = self.round.as_mut().expect("close with no live round");
        round.close(now_ms, &self.roster);
        self.round_epoch += 1;

        let event = SessionEvent::RoundClosed {
            question_index: round.question_index,
            correct_option: round.correct_option(),
            counts: round.tally(),
        };
        self.record(now_ms, event)
    }

    /// Open the round at `index` and emit its record.
    fn open_round(&mut self, index: u32, now_ms: u64) -> EventRecord {
        debug_assert!(index < self.total_rounds());
        let question = &self.quiz.questions[index as usize];

        self.current_round_index = Some(index);
        self.round = Some(Round::open(question, index, now_ms));
        self.round_epoch += 1;

        self.record(now_ms, SessionEvent::RoundOpened {
            question_index: index,
            question_id: question.id,
            text: question.text.clone(),
            options: question.options.clone(),
            time_limit_ms: question.time_limit_ms,
        })
    }

    /// Move the live round (closed) into history.
    fn retire_round(&mut self) {
        if let Some(round) = self.round.take() {
            debug_assert!(round.is_closed());
            self.history.push(round);
        }
    }

    /// Terminal transition shared by `next` (rounds exhausted) and `end`.
    fn finish(&mut self, now_ms: u64) -> Vec<EventRecord> {
        let from = self.state;
        self.state = SessionState::Ended;
        self.ended_at = Some(Utc::now());

        let changed = self.record(now_ms, SessionEvent::SessionStateChanged {
            from,
            to: SessionState::Ended,
            round_index: self.current_round_index,
        });
        let ended = self.record(now_ms, SessionEvent::SessionEnded {
            final_ranking: self.roster.ranking(),
        });

        vec![changed, ended]
    }

    fn record(&self, now_ms: u64, event: SessionEvent) -> EventRecord {
        EventRecord::new(self.id, now_ms, event)
    }
}
