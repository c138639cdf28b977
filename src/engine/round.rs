//! Question Round
//!
//! The lifecycle of exactly one open question: answer collection keyed by
//! participant (first answer wins, never overwritten), per-option tallies,
//! and the close step that freezes the round and fills in a timeout entry
//! for every roster member who never answered.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::engine::errors::SessionError;
use crate::engine::quiz::Question;
use crate::engine::roster::{ParticipantId, Roster};
use crate::engine::scoring;

/// A recorded answer. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Who answered.
    pub participant_id: ParticipantId,
    /// Selected option index, or `None` for a synthesized timeout entry.
    pub selected: Option<u8>,
    /// Offset from round open in milliseconds, clamped to the time limit.
    pub submitted_at_ms: u64,
    /// Points awarded. Computed exactly once at acceptance.
    pub points: u32,
}

impl Answer {
    /// Whether this entry was synthesized at close rather than submitted.
    pub fn is_timeout(&self) -> bool {
        self.selected.is_none()
    }
}

/// One question round.
///
/// Owned exclusively by its session; all mutation goes through the
/// session's serialized command path.
#[derive(Debug, Clone)]
pub struct Round {
    /// Question id, checked against submissions.
    pub question_id: u32,
    /// Zero-based index within the quiz.
    pub question_index: u32,
    correct_option: u8,
    option_count: u8,
    /// Time allowed, in milliseconds.
    pub time_limit_ms: u64,
    /// Monotonic open time.
    pub opened_at_ms: u64,
    /// Monotonic close time, set exactly once.
    pub closed_at_ms: Option<u64>,
    answers: BTreeMap<ParticipantId, Answer>,
}

impl Round {
    /// Open a round for the given question.
    ///
    /// Only called by the owning session during a transition.
    pub fn open(question: &Question, question_index: u32, now_ms: u64) -> Self {
        Self {
            question_id: question.id,
            question_index,
            correct_option: question.correct_index,
            option_count: question.option_count(),
            time_limit_ms: question.time_limit_ms,
            opened_at_ms: now_ms,
            closed_at_ms: None,
            answers: BTreeMap::new(),
        }
    }

    /// Whether the round no longer accepts answers.
    pub fn is_closed(&self) -> bool {
        self.closed_at_ms.is_some()
    }

    /// Monotonic deadline after which the round expires.
    pub fn deadline_ms(&self) -> u64 {
        self.opened_at_ms.saturating_add(self.time_limit_ms)
    }

    /// Index of the correct option.
    pub fn correct_option(&self) -> u8 {
        self.correct_option
    }

    /// Number of answer options.
    pub fn option_count(&self) -> u8 {
        self.option_count
    }

    /// Record an answer and return the points it earned.
    ///
    /// Rejects `RoundClosed` once closed, `DuplicateAnswer` if the
    /// participant already has an entry, and `InvalidOption` for an index
    /// outside the option range. Membership in the owning roster is
    /// checked by the session before this call. The caller applies the
    /// returned points to the roster in the same serialized step.
    pub fn submit_answer(
        &mut self,
        participant_id: ParticipantId,
        selected: u8,
        now_ms: u64,
    ) -> Result<u32, SessionError> {
        if self.is_closed() {
            return Err(SessionError::RoundClosed);
        }
        if self.answers.contains_key(&participant_id) {
            return Err(SessionError::DuplicateAnswer);
        }
        if selected >= self.option_count {
            return Err(SessionError::InvalidOption);
        }

        let elapsed = now_ms
            .saturating_sub(self.opened_at_ms)
            .min(self.time_limit_ms);
        let correct = selected == self.correct_option;
        let points = scoring::points(correct, elapsed, self.time_limit_ms);

        self.answers.insert(participant_id, Answer {
            participant_id,
            selected: Some(selected),
            submitted_at_ms: elapsed,
            points,
        });

        Ok(points)
    }

    /// Close the round.
    ///
    /// Idempotent: closing an already-closed round changes nothing. On
    /// first close, every roster member without an answer gets a
    /// synthesized timeout entry, so post-round tallies always cover the
    /// full roster.
    pub fn close(&mut self, now_ms: u64, roster: &Roster) {
        if self.is_closed() {
            return;
        }
        self.closed_at_ms = Some(now_ms);

        for participant in roster.iter() {
            self.answers.entry(participant.id).or_insert(Answer {
                participant_id: participant.id,
                selected: None,
                submitted_at_ms: self.time_limit_ms,
                points: 0,
            });
        }
    }

    /// Answer count per option index.
    ///
    /// Recomputed on demand over the recorded answers; timeout entries
    /// count toward no option.
    pub fn tally(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.option_count as usize];
        for answer in self.answers.values() {
            if let Some(option) = answer.selected {
                counts[option as usize] += 1;
            }
        }
        counts
    }

    /// Number of real (non-synthesized) answers recorded.
    pub fn answered_count(&self) -> u32 {
        self.answers.values().filter(|a| !a.is_timeout()).count() as u32
    }

    /// Total entries, including synthesized timeout answers.
    pub fn entry_count(&self) -> usize {
        self.answers.len()
    }

    /// Look up a participant's answer.
    pub fn answer(&self, id: &ParticipantId) -> Option<&Answer> {
        self.answers.get(id)
    }

    /// Iterate over recorded answers in participant-id order.
    pub fn answers(&self) -> impl Iterator<Item = &Answer> {
        self.answers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::quiz::Question;

    fn question() -> Question {
        Question::new(
            7,
            "2 + 2?",
            vec!["3".into(), "4".into(), "5".into(), "6".into()],
            1,
        )
    }

    fn member(roster: &mut Roster, name: &str) -> ParticipantId {
        roster.join(name, 0).unwrap().id
    }

    #[test]
    fn test_correct_answer_scores() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let mut round = Round::open(&question(), 0, 1_000);

        // 5s elapsed of 20s: 750 points.
        let points = round.submit_answer(a, 1, 6_000).unwrap();
        assert_eq!(points, 750);
        assert_eq!(round.answer(&a).unwrap().submitted_at_ms, 5_000);
    }

    #[test]
    fn test_incorrect_answer_scores_zero() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let mut round = Round::open(&question(), 0, 0);

        assert_eq!(round.submit_answer(a, 0, 100).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_answer_rejected_not_overwritten() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let mut round = Round::open(&question(), 0, 0);

        round.submit_answer(a, 1, 1_000).unwrap();
        assert_eq!(
            round.submit_answer(a, 0, 2_000),
            Err(SessionError::DuplicateAnswer)
        );

        // First answer wins.
        assert_eq!(round.answer(&a).unwrap().selected, Some(1));
        assert_eq!(round.answer(&a).unwrap().submitted_at_ms, 1_000);
    }

    #[test]
    fn test_invalid_option_rejected() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let mut round = Round::open(&question(), 0, 0);

        assert_eq!(round.submit_answer(a, 4, 100), Err(SessionError::InvalidOption));
        assert_eq!(round.entry_count(), 0);
    }

    #[test]
    fn test_submit_after_close_rejected() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let mut round = Round::open(&question(), 0, 0);

        round.close(5_000, &roster);
        assert_eq!(
            round.submit_answer(a, 1, 6_000),
            Err(SessionError::RoundClosed)
        );
    }

    #[test]
    fn test_close_synthesizes_timeout_entries() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let b = member(&mut roster, "B");
        let c = member(&mut roster, "C");
        let mut round = Round::open(&question(), 0, 0);

        round.submit_answer(a, 1, 2_000).unwrap();
        round.close(20_000, &roster);

        assert_eq!(round.entry_count(), 3);
        assert!(round.answer(&b).unwrap().is_timeout());
        assert_eq!(round.answer(&b).unwrap().points, 0);
        assert!(round.answer(&c).unwrap().is_timeout());
        assert!(!round.answer(&a).unwrap().is_timeout());
    }

    #[test]
    fn test_close_idempotent() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let mut round = Round::open(&question(), 0, 0);

        round.submit_answer(a, 1, 2_000).unwrap();
        round.close(20_000, &roster);
        let entries_after_first = round.entry_count();
        let closed_at = round.closed_at_ms;

        // Second close must not duplicate or alter entries.
        round.close(30_000, &roster);
        assert_eq!(round.entry_count(), entries_after_first);
        assert_eq!(round.closed_at_ms, closed_at);
    }

    #[test]
    fn test_tally_counts_real_answers_only() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let b = member(&mut roster, "B");
        let c = member(&mut roster, "C");
        let mut round = Round::open(&question(), 0, 0);

        round.submit_answer(a, 1, 1_000).unwrap();
        round.submit_answer(b, 1, 2_000).unwrap();
        round.submit_answer(c, 3, 3_000).unwrap();

        assert_eq!(round.tally(), vec![0, 2, 0, 1]);
        assert_eq!(round.answered_count(), 3);

        // Timeout entries do not shift the tally.
        let d = member(&mut roster, "D");
        let _ = d;
        round.close(20_000, &roster);
        assert_eq!(round.tally(), vec![0, 2, 0, 1]);
        assert_eq!(round.answered_count(), 3);
    }

    #[test]
    fn test_elapsed_clamped_to_limit() {
        let mut roster = Roster::new();
        let a = member(&mut roster, "A");
        let mut round = Round::open(&question(), 0, 1_000);

        // Submission lands past the deadline but before the timer fired:
        // clamped, floor points.
        let points = round.submit_answer(a, 1, 30_000).unwrap();
        assert_eq!(points, 100);
        assert_eq!(round.answer(&a).unwrap().submitted_at_ms, 20_000);
    }
}
