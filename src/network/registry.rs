//! Session Registry
//!
//! Process-wide table of live sessions. Allocates join codes, routes
//! every host and participant command to the owning session, arms the
//! per-round deadline timer, and evicts ended sessions.
//!
//! Each session sits behind its own `RwLock`; a command takes the write
//! guard, mutates, and publishes the resulting events through the
//! gateway before releasing it. That single guard is the serialization
//! point the engine relies on: answer acceptance and the score increment
//! commit together, and per-session event order on the wire matches
//! mutation order. Operations on different sessions never contend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::engine::clock::Clock;
use crate::engine::errors::SessionError;
use crate::engine::quiz::{QuizId, QuizStore};
use crate::engine::roster::{ParticipantId, RankEntry};
use crate::engine::session::{QuizSession, SessionId, SessionState};
use crate::network::gateway::Gateway;

/// Smallest join code.
pub const JOIN_CODE_MIN: u32 = 100_000;

/// Largest join code.
pub const JOIN_CODE_MAX: u32 = 999_999;

/// A session behind its serialization point.
pub type SharedSession = Arc<RwLock<QuizSession>>;

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an ended session stays resolvable by id (its join code is
    /// freed immediately at end). Retention is policy, not correctness.
    pub eviction_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            eviction_delay: Duration::from_secs(300),
        }
    }
}

/// Result of creating a session.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    /// New session id.
    pub session_id: SessionId,
    /// Allocated 6-digit join code.
    pub join_code: String,
    /// Title of the quiz being run.
    pub quiz_title: String,
    /// Number of rounds the session will run.
    pub total_rounds: u32,
}

/// Result of joining a session.
#[derive(Debug, Clone)]
pub struct JoinedSession {
    /// Session joined.
    pub session_id: SessionId,
    /// Id assigned to the new participant.
    pub participant_id: ParticipantId,
    /// Title of the quiz being run.
    pub quiz_title: String,
}

/// Process-wide table of live sessions.
pub struct SessionRegistry {
    sessions: Arc<RwLock<BTreeMap<SessionId, SharedSession>>>,
    /// Join-code index. Holds codes of non-ended sessions only, so ended
    /// sessions release their slice of the 900k code space immediately.
    codes: Arc<RwLock<BTreeMap<String, SessionId>>>,
    quiz_store: Arc<dyn QuizStore>,
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

impl SessionRegistry {
    /// Create a registry with default configuration.
    pub fn new(
        quiz_store: Arc<dyn QuizStore>,
        gateway: Arc<dyn Gateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(quiz_store, gateway, clock, RegistryConfig::default())
    }

    /// Create a registry with explicit configuration.
    pub fn with_config(
        quiz_store: Arc<dyn QuizStore>,
        gateway: Arc<dyn Gateway>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(BTreeMap::new())),
            codes: Arc::new(RwLock::new(BTreeMap::new())),
            quiz_store,
            gateway,
            clock,
            config,
        }
    }

    /// Create a session for the given quiz and allocate its join code.
    pub async fn create_session(&self, quiz_id: QuizId) -> Result<CreatedSession, SessionError> {
        // The quiz snapshot must exist before a session can reference it.
        let quiz = self.quiz_store
            .get_quiz(&quiz_id)
            .ok_or(SessionError::SessionNotFound)?;

        let session_id: SessionId = uuid::Uuid::new_v4().into_bytes();
        let join_code = self.allocate_code(session_id).await;

        let created = CreatedSession {
            session_id,
            join_code: join_code.clone(),
            quiz_title: quiz.title.clone(),
            total_rounds: quiz.round_count(),
        };

        let session = QuizSession::new(session_id, join_code, quiz);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, Arc::new(RwLock::new(session)));

        info!(code = %created.join_code, rounds = created.total_rounds, "Session created");
        Ok(created)
    }

    /// Join a waiting session by code.
    pub async fn join_session(
        &self,
        join_code: &str,
        display_name: &str,
    ) -> Result<JoinedSession, SessionError> {
        let session = self.resolve(join_code).await?;
        let mut guard = session.write().await;

        let now = self.clock.now_ms();
        let (participant_id, record) = guard.join(display_name, now)?;
        self.gateway.publish(&record);

        debug!(code = %join_code, name = %display_name, "Participant joined");
        Ok(JoinedSession {
            session_id: guard.id,
            participant_id,
            quiz_title: guard.quiz().title.clone(),
        })
    }

    /// Start a session: open round 0 and arm its deadline timer.
    pub async fn start_session(&self, session_id: SessionId) -> Result<(), SessionError> {
        let session = self.get(&session_id).await?;

        let (armed_epoch, deadline_ms) = {
            let mut guard = session.write().await;
            let records = guard.start(self.clock.now_ms())?;
            for record in &records {
                self.gateway.publish(record);
            }

            let round = guard.round().expect("started session has a live round");
            (guard.round_epoch(), round.deadline_ms())
        };

        self.arm_round_timer(session, armed_epoch, deadline_ms);
        Ok(())
    }

    /// Record a participant's answer; returns the points earned.
    pub async fn submit_answer(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        question_id: u32,
        selected: u8,
    ) -> Result<u32, SessionError> {
        let session = self.get(&session_id).await?;
        let mut guard = session.write().await;

        let now = self.clock.now_ms();
        let (points, record) = guard.submit_answer(participant_id, question_id, selected, now)?;
        self.gateway.publish(&record);

        Ok(points)
    }

    /// Host reveal: close the current round.
    pub async fn reveal_round(&self, session_id: SessionId) -> Result<(), SessionError> {
        let session = self.get(&session_id).await?;
        let mut guard = session.write().await;

        let record = guard.reveal(self.clock.now_ms())?;
        self.gateway.publish(&record);

        Ok(())
    }

    /// Advance to the next round, or end the session if none remain.
    pub async fn next_round(&self, session_id: SessionId) -> Result<(), SessionError> {
        let session = self.get(&session_id).await?;

        enum Outcome {
            RoundOpen { armed_epoch: u64, deadline_ms: u64 },
            Ended { join_code: String },
        }

        let outcome = {
            let mut guard = session.write().await;
            let records = guard.next(self.clock.now_ms())?;
            for record in &records {
                self.gateway.publish(record);
            }

            match guard.state() {
                SessionState::Active => {
                    let round = guard.round().expect("active session has a live round");
                    Outcome::RoundOpen {
                        armed_epoch: guard.round_epoch(),
                        deadline_ms: round.deadline_ms(),
                    }
                }
                SessionState::Ended => Outcome::Ended { join_code: guard.join_code.clone() },
                SessionState::Waiting => unreachable!("next cannot return to waiting"),
            }
        };

        match outcome {
            Outcome::RoundOpen { armed_epoch, deadline_ms } => {
                self.arm_round_timer(session, armed_epoch, deadline_ms);
            }
            Outcome::Ended { join_code } => {
                self.finalize_ended(session_id, &join_code).await;
            }
        }
        Ok(())
    }

    /// End a session from any non-terminal state.
    pub async fn end_session(&self, session_id: SessionId) -> Result<(), SessionError> {
        let session = self.get(&session_id).await?;

        let join_code = {
            let mut guard = session.write().await;
            let records = guard.end(self.clock.now_ms())?;
            for record in &records {
                self.gateway.publish(record);
            }
            guard.join_code.clone()
        };

        self.finalize_ended(session_id, &join_code).await;
        Ok(())
    }

    /// Current leaderboard of a session.
    pub async fn leaderboard(&self, session_id: SessionId) -> Result<Vec<RankEntry>, SessionError> {
        let session = self.get(&session_id).await?;
        let guard = session.read().await;
        Ok(guard.leaderboard())
    }

    /// Resolve a join code to its live session.
    ///
    /// Codes of ended sessions are released at end time, so this only
    /// ever returns a session that has not ended.
    pub async fn resolve(&self, join_code: &str) -> Result<SharedSession, SessionError> {
        let session_id = {
            let codes = self.codes.read().await;
            codes.get(join_code).copied()
        };
        match session_id {
            Some(id) => self.get(&id).await,
            None => Err(SessionError::SessionNotFound),
        }
    }

    /// Look up a session by id.
    pub async fn get(&self, session_id: &SessionId) -> Result<SharedSession, SessionError> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned().ok_or(SessionError::SessionNotFound)
    }

    /// Remove an ended session from the table immediately.
    ///
    /// Returns false (and removes nothing) while the session has not
    /// ended; eviction never precedes the terminal state.
    pub async fn evict(&self, session_id: &SessionId) -> bool {
        let Ok(session) = self.get(session_id).await else {
            return false;
        };
        if session.read().await.state() != SessionState::Ended {
            return false;
        }

        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(session_id).is_some();
        if removed {
            self.gateway.retire_session(session_id);
        }
        removed
    }

    /// Number of sessions currently in the table.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Draw a code uniformly from the 6-digit space, retrying on
    /// collision with a currently live session. The space is 900k wide;
    /// live sessions number far fewer, so the loop terminates quickly.
    async fn allocate_code(&self, session_id: SessionId) -> String {
        let mut codes = self.codes.write().await;
        loop {
            let code = rand::thread_rng()
                .gen_range(JOIN_CODE_MIN..=JOIN_CODE_MAX)
                .to_string();
            if !codes.contains_key(&code) {
                codes.insert(code.clone(), session_id);
                return code;
            }
        }
    }

    /// Arm the deadline timer for the round the given epoch belongs to.
    ///
    /// The timer goes through the same write lock as every other
    /// mutation; if the round was revealed, advanced, or the session
    /// ended first, the epoch no longer matches and the fire is a no-op.
    /// That epoch guard is also how `end` cancels a pending timer.
    fn arm_round_timer(&self, session: SharedSession, armed_epoch: u64, deadline_ms: u64) {
        let gateway = self.gateway.clone();
        let clock = self.clock.clone();

        tokio::spawn(async move {
            let delay = deadline_ms.saturating_sub(clock.now_ms());
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let mut guard = session.write().await;
            if let Some(record) = guard.expire_round(armed_epoch, clock.now_ms()) {
                debug!(round = ?guard.current_round_index(), "Round expired");
                gateway.publish(&record);
            }
        });
    }

    /// Release an ended session's join code now and schedule its removal
    /// from the table after the retention delay.
    async fn finalize_ended(&self, session_id: SessionId, join_code: &str) {
        {
            let mut codes = self.codes.write().await;
            codes.remove(join_code);
        }

        let sessions = self.sessions.clone();
        let gateway = self.gateway.clone();
        let delay = self.config.eviction_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut sessions = sessions.write().await;
            if sessions.remove(&session_id).is_some() {
                gateway.retire_session(&session_id);
            }
        });

        info!(code = %join_code, "Session ended, code released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::engine::clock::{ManualClock, MonotonicClock};
    use crate::engine::events::SessionEvent;
    use crate::engine::quiz::{InMemoryQuizStore, Question, Quiz};
    use crate::network::gateway::BroadcastGateway;

    const QUIZ_ID: QuizId = [3; 16];

    fn quiz(time_limit_ms: u64) -> Quiz {
        Quiz {
            id: QUIZ_ID,
            title: "Test Quiz".to_string(),
            questions: vec![
                Question {
                    id: 10,
                    text: "First?".to_string(),
                    options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_index: 0,
                    time_limit_ms,
                },
                Question {
                    id: 11,
                    text: "Second?".to_string(),
                    options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_index: 2,
                    time_limit_ms,
                },
            ],
        }
    }

    fn registry_with(
        clock: Arc<dyn Clock>,
        time_limit_ms: u64,
    ) -> (Arc<SessionRegistry>, Arc<BroadcastGateway>) {
        let store = Arc::new(InMemoryQuizStore::new());
        store.insert(quiz(time_limit_ms));
        let gateway = Arc::new(BroadcastGateway::new(64));
        let registry = Arc::new(SessionRegistry::new(store, gateway.clone(), clock));
        (registry, gateway)
    }

    fn manual_registry() -> (Arc<SessionRegistry>, Arc<BroadcastGateway>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let (registry, gateway) = registry_with(clock.clone(), 20_000);
        (registry, gateway, clock)
    }

    #[tokio::test]
    async fn test_create_allocates_six_digit_code() {
        let (registry, _, _) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();

        assert_eq!(created.join_code.len(), 6);
        let code: u32 = created.join_code.parse().unwrap();
        assert!((JOIN_CODE_MIN..=JOIN_CODE_MAX).contains(&code));
        assert_eq!(created.total_rounds, 2);
    }

    #[tokio::test]
    async fn test_create_unknown_quiz_fails() {
        let (registry, _, _) = manual_registry();
        let result = registry.create_session([99; 16]).await;
        assert!(matches!(result, Err(SessionError::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_codes_unique_among_live_sessions() {
        let (registry, _, _) = manual_registry();

        let mut codes = BTreeSet::new();
        for _ in 0..50 {
            let created = registry.create_session(QUIZ_ID).await.unwrap();
            assert!(codes.insert(created.join_code), "duplicate live join code");
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_code() {
        let (registry, _, _) = manual_registry();
        assert!(matches!(
            registry.resolve("000000").await.map(|_| ()),
            Err(SessionError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_join_after_start_rejected() {
        let (registry, _, _) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();

        registry.join_session(&created.join_code, "Ada").await.unwrap();
        registry.start_session(created.session_id).await.unwrap();

        let result = registry.join_session(&created.join_code, "Late").await;
        assert!(matches!(result, Err(SessionError::SessionAlreadyStarted)));
    }

    #[tokio::test]
    async fn test_event_stream_order() {
        let (registry, gateway, _) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();
        let mut rx = gateway.subscribe(created.session_id);

        let joined = registry.join_session(&created.join_code, "Ada").await.unwrap();
        registry.start_session(created.session_id).await.unwrap();
        registry
            .submit_answer(created.session_id, joined.participant_id, 10, 0)
            .await
            .unwrap();
        registry.reveal_round(created.session_id).await.unwrap();
        registry.next_round(created.session_id).await.unwrap();
        registry.end_session(created.session_id).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(record) = rx.try_recv() {
            kinds.push(match record.event {
                SessionEvent::ParticipantJoined { .. } => "joined",
                SessionEvent::SessionStateChanged { .. } => "state",
                SessionEvent::RoundOpened { .. } => "opened",
                SessionEvent::AnswerTallyUpdated { .. } => "tally",
                SessionEvent::RoundClosed { .. } => "closed",
                SessionEvent::SessionEnded { .. } => "ended",
            });
        }

        assert_eq!(
            kinds,
            vec![
                "joined", "state", "opened", "tally", "closed",
                "opened", "closed", "state", "ended",
            ]
        );
    }

    #[tokio::test]
    async fn test_answer_routing_and_scoring() {
        let (registry, _, clock) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();
        let joined = registry.join_session(&created.join_code, "Ada").await.unwrap();
        registry.start_session(created.session_id).await.unwrap();

        clock.advance(5_000);
        let points = registry
            .submit_answer(created.session_id, joined.participant_id, 10, 0)
            .await
            .unwrap();
        assert_eq!(points, 750);

        let board = registry.leaderboard(created.session_id).await.unwrap();
        assert_eq!(board[0].score, 750);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_accept_exactly_one() {
        let (registry, _, _) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();
        let joined = registry.join_session(&created.join_code, "Ada").await.unwrap();
        registry.start_session(created.session_id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let session_id = created.session_id;
            let participant_id = joined.participant_id;
            handles.push(tokio::spawn(async move {
                registry.submit_answer(session_id, participant_id, 10, 0).await
            }));
        }

        let mut accepted = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(SessionError::DuplicateAnswer) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(duplicates, 7);

        // Exactly one score increment happened.
        let board = registry.leaderboard(created.session_id).await.unwrap();
        assert_eq!(board[0].score, 1000);
    }

    #[tokio::test]
    async fn test_round_timer_closes_round() {
        let clock = Arc::new(MonotonicClock::new());
        let (registry, gateway) = registry_with(clock, 50);

        let created = registry.create_session(QUIZ_ID).await.unwrap();
        let mut rx = gateway.subscribe(created.session_id);
        let joined = registry.join_session(&created.join_code, "Ada").await.unwrap();
        registry.start_session(created.session_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        // The deadline fired without a reveal; answers now bounce.
        let result = registry
            .submit_answer(created.session_id, joined.participant_id, 10, 0)
            .await;
        assert!(matches!(result, Err(SessionError::RoundClosed)));

        let mut saw_round_closed = false;
        while let Ok(record) = rx.try_recv() {
            if matches!(record.event, SessionEvent::RoundClosed { .. }) {
                saw_round_closed = true;
            }
        }
        assert!(saw_round_closed);
    }

    #[tokio::test]
    async fn test_end_releases_code() {
        let (registry, _, _) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();
        registry.join_session(&created.join_code, "Ada").await.unwrap();

        registry.end_session(created.session_id).await.unwrap();

        // The code no longer resolves; the slot is free for reuse.
        assert!(matches!(
            registry.resolve(&created.join_code).await.map(|_| ()),
            Err(SessionError::SessionNotFound)
        ));
        // The session itself is still queryable until eviction.
        assert!(registry.get(&created.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_evict_requires_ended() {
        let (registry, _, _) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();

        assert!(!registry.evict(&created.session_id).await);
        assert_eq!(registry.session_count().await, 1);

        registry.end_session(created.session_id).await.unwrap();
        assert!(registry.evict(&created.session_id).await);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_commands_rejected() {
        let (registry, _, _) = manual_registry();
        let created = registry.create_session(QUIZ_ID).await.unwrap();
        registry.join_session(&created.join_code, "Ada").await.unwrap();
        registry.start_session(created.session_id).await.unwrap();

        // Start again: stale retry, rejected, state unchanged.
        assert!(matches!(
            registry.start_session(created.session_id).await,
            Err(SessionError::InvalidTransition)
        ));

        registry.end_session(created.session_id).await.unwrap();
        assert!(matches!(
            registry.end_session(created.session_id).await,
            Err(SessionError::SessionEnded)
        ));
    }
}
