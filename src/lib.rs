//! # QuizSync Session Server
//!
//! Authoritative server for synchronous classroom quizzes: one host
//! drives timed multiple-choice rounds, participants join with a 6-digit
//! code and answer concurrently, and everyone observes the same ordered
//! stream of round state and the final leaderboard.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   QUIZSYNC SESSION SERVER                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  engine/         - Session logic (synchronous)               │
//! │  ├── scoring.rs  - Pure answer-scoring function              │
//! │  ├── roster.rs   - Participants, scores, ranking             │
//! │  ├── round.rs    - One question's answers and tally          │
//! │  ├── session.rs  - Lifecycle state machine                   │
//! │  ├── quiz.rs     - Quiz snapshots and store boundary         │
//! │  ├── events.rs   - Records emitted by mutations              │
//! │  └── clock.rs    - Injected monotonic clock                  │
//! │                                                              │
//! │  network/        - Async front end (non-deterministic)       │
//! │  ├── registry.rs - Session table, codes, timers, routing     │
//! │  ├── gateway.rs  - Per-session event fan-out                 │
//! │  ├── protocol.rs - Message types                             │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Guarantee
//!
//! Each session is an independent unit of concurrency behind its own
//! lock. Every mutation — a host command, an answer submission, a round
//! deadline firing — runs one at a time against that session, and the
//! events it emits are published in mutation order. Answer acceptance
//! and the score increment commit in the same step: a participant's
//! second submission is rejected, never double-counted.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod engine;
pub mod network;

// Re-export commonly used types
pub use engine::clock::{Clock, ManualClock, MonotonicClock};
pub use engine::errors::SessionError;
pub use engine::events::{EventRecord, SessionEvent};
pub use engine::quiz::{InMemoryQuizStore, Question, Quiz, QuizId, QuizStore};
pub use engine::roster::{Participant, ParticipantId, RankEntry};
pub use engine::session::{QuizSession, SessionId, SessionState};
pub use network::gateway::{BroadcastGateway, Gateway};
pub use network::registry::SessionRegistry;
pub use network::server::{QuizServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default time limit per question (20 seconds).
pub const DEFAULT_TIME_LIMIT_MS: u64 = 20_000;
