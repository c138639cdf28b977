//! Session Roster
//!
//! Participants of one session: admission while the session is waiting,
//! score accumulation during play, and the ranked leaderboard. The roster
//! never removes members mid-game; participants live exactly as long as
//! their session.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::engine::errors::SessionError;

/// Maximum display name length, in characters, after trimming.
pub const MAX_NAME_CHARS: usize = 20;

/// Unique participant identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a fresh random identifier.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// One member of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Unique participant id.
    pub id: ParticipantId,
    /// Display name, trimmed, 1 to [`MAX_NAME_CHARS`] characters.
    /// Duplicate names within a session are allowed.
    pub display_name: String,
    /// Accumulated score. Monotonically non-decreasing.
    pub score: u32,
    /// Monotonic timestamp of the join, for display.
    pub joined_at_ms: u64,
    /// Admission sequence number. The deterministic ranking tie-break,
    /// even when two joins land on the same millisecond.
    pub join_order: u32,
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    /// Participant id.
    pub participant_id: ParticipantId,
    /// Display name at join time.
    pub display_name: String,
    /// Final or current score.
    pub score: u32,
    /// 1-based rank.
    pub rank: u32,
}

/// Participants of one session.
#[derive(Debug, Default)]
pub struct Roster {
    participants: BTreeMap<ParticipantId, Participant>,
    next_join_order: u32,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a participant.
    ///
    /// The caller (the session) is responsible for checking that the
    /// session is still waiting; the roster only validates the name:
    /// empty after trimming or longer than [`MAX_NAME_CHARS`] characters
    /// is rejected with `InvalidName`.
    pub fn join(&mut self, display_name: &str, now_ms: u64) -> Result<&Participant, SessionError> {
        let name = display_name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
            return Err(SessionError::InvalidName);
        }

        let id = ParticipantId::random();
        let join_order = self.next_join_order;
        self.next_join_order += 1;

        let participant = Participant {
            id,
            display_name: name.to_string(),
            score: 0,
            joined_at_ms: now_ms,
            join_order,
        };

        Ok(self.participants.entry(id).or_insert(participant))
    }

    /// Add points to a participant's score, returning the new total.
    ///
    /// Called exactly once per participant per round; the single-answer
    /// invariant lives in the round's answer map, not here. Must run in
    /// the same serialized step as answer acceptance.
    pub fn apply_points(&mut self, id: &ParticipantId, points: u32) -> Result<u32, SessionError> {
        let participant = self.participants
            .get_mut(id)
            .ok_or(SessionError::UnknownParticipant)?;
        participant.score += points;
        Ok(participant.score)
    }

    /// Whether the participant is a member.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    /// Look up a participant.
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Member count.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the roster has no members.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Iterate over members in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Member ids in id order.
    pub fn member_ids(&self) -> Vec<ParticipantId> {
        self.participants.keys().copied().collect()
    }

    /// The leaderboard: score descending, ties broken by join order
    /// ascending (earlier joiners rank higher on equal score).
    ///
    /// Stable and deterministic: repeated calls with no intervening
    /// mutation return identical sequences.
    pub fn ranking(&self) -> Vec<RankEntry> {
        let mut ranked: Vec<&Participant> = self.participants.values().collect();
        ranked.sort_by(|a, b| {
            b.score.cmp(&a.score).then(a.join_order.cmp(&b.join_order))
        });

        ranked.iter()
            .enumerate()
            .map(|(i, p)| RankEntry {
                participant_id: p.id,
                display_name: p.display_name.clone(),
                score: p.score,
                rank: (i + 1) as u32,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_trims_name() {
        let mut roster = Roster::new();
        let p = roster.join("  Ada  ", 0).unwrap();
        assert_eq!(p.display_name, "Ada");
        assert_eq!(p.score, 0);
    }

    #[test]
    fn test_join_rejects_empty_name() {
        let mut roster = Roster::new();
        assert_eq!(roster.join("", 0), Err(SessionError::InvalidName));
        assert_eq!(roster.join("   ", 0), Err(SessionError::InvalidName));
    }

    #[test]
    fn test_join_rejects_overlong_name() {
        let mut roster = Roster::new();
        let long = "x".repeat(MAX_NAME_CHARS + 1);
        assert_eq!(roster.join(&long, 0), Err(SessionError::InvalidName));

        // Exactly at the limit is fine.
        let max = "x".repeat(MAX_NAME_CHARS);
        assert!(roster.join(&max, 0).is_ok());
    }

    #[test]
    fn test_duplicate_names_allowed() {
        let mut roster = Roster::new();
        let a = roster.join("Sam", 0).unwrap().id;
        let b = roster.join("Sam", 1).unwrap().id;
        assert_ne!(a, b);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_apply_points_accumulates() {
        let mut roster = Roster::new();
        let id = roster.join("Ada", 0).unwrap().id;

        assert_eq!(roster.apply_points(&id, 750).unwrap(), 750);
        assert_eq!(roster.apply_points(&id, 0).unwrap(), 750);
        assert_eq!(roster.apply_points(&id, 250).unwrap(), 1000);
    }

    #[test]
    fn test_apply_points_unknown_participant() {
        let mut roster = Roster::new();
        let ghost = ParticipantId::new([9; 16]);
        assert_eq!(
            roster.apply_points(&ghost, 100),
            Err(SessionError::UnknownParticipant)
        );
    }

    #[test]
    fn test_ranking_by_score_then_join_order() {
        let mut roster = Roster::new();
        let a = roster.join("A", 0).unwrap().id;
        let b = roster.join("B", 1).unwrap().id;
        let c = roster.join("C", 2).unwrap().id;

        roster.apply_points(&b, 500).unwrap();
        roster.apply_points(&c, 500).unwrap();
        roster.apply_points(&a, 200).unwrap();

        let ranking = roster.ranking();
        // B and C tie at 500; B joined earlier and ranks higher.
        assert_eq!(ranking[0].participant_id, b);
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[1].participant_id, c);
        assert_eq!(ranking[1].rank, 2);
        assert_eq!(ranking[2].participant_id, a);
        assert_eq!(ranking[2].rank, 3);
    }

    #[test]
    fn test_ranking_stable_across_reads() {
        let mut roster = Roster::new();
        for i in 0..8 {
            roster.join(&format!("P{i}"), i as u64).unwrap();
        }

        let first = roster.ranking();
        let second = roster.ranking();
        assert_eq!(first, second);
    }

    #[test]
    fn test_participant_id_uuid_roundtrip() {
        let id = ParticipantId::random();
        let s = id.to_uuid_string();
        assert_eq!(ParticipantId::from_uuid_str(&s), Some(id));
    }
}
