//! Quiz Types and Store Boundary
//!
//! A quiz is an ordered list of multiple-choice questions. Quizzes are
//! authored and persisted elsewhere; the engine takes an immutable
//! snapshot through [`QuizStore`] when a session is created and never
//! observes edits mid-session.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use serde::{Serialize, Deserialize};

use crate::DEFAULT_TIME_LIMIT_MS;

/// Opaque quiz identifier (UUID as bytes).
pub type QuizId = [u8; 16];

/// One multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Identifier unique within the quiz, carried on answer submissions
    /// so a late submission for a previous question is detectable.
    pub id: u32,
    /// Question text shown to all clients.
    pub text: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Index of the correct option. Never sent to participants while the
    /// round is open.
    pub correct_index: u8,
    /// Time allowed for this question, in milliseconds.
    pub time_limit_ms: u64,
}

impl Question {
    /// Create a question with the default time limit.
    pub fn new(id: u32, text: impl Into<String>, options: Vec<String>, correct_index: u8) -> Self {
        Self {
            id,
            text: text.into(),
            options,
            correct_index,
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
        }
    }

    /// Number of answer options.
    pub fn option_count(&self) -> u8 {
        self.options.len() as u8
    }
}

/// An immutable quiz snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    /// Quiz identifier.
    pub id: QuizId,
    /// Display title.
    pub title: String,
    /// Questions in play order.
    pub questions: Vec<Question>,
}

impl Quiz {
    /// Number of rounds a session of this quiz will run.
    pub fn round_count(&self) -> u32 {
        self.questions.len() as u32
    }
}

/// Read-side boundary to wherever quizzes are persisted.
pub trait QuizStore: Send + Sync {
    /// Fetch a quiz snapshot by id. The returned quiz must not change for
    /// the lifetime of any session created from it.
    fn get_quiz(&self, id: &QuizId) -> Option<Arc<Quiz>>;
}

/// In-memory quiz store.
///
/// Backs tests and single-process deployments; a database-backed store
/// implements the same trait outside this crate.
#[derive(Default)]
pub struct InMemoryQuizStore {
    quizzes: RwLock<BTreeMap<QuizId, Arc<Quiz>>>,
}

impl InMemoryQuizStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a quiz, replacing any previous snapshot under the same id.
    pub fn insert(&self, quiz: Quiz) {
        let mut quizzes = self.quizzes.write().expect("quiz store lock poisoned");
        quizzes.insert(quiz.id, Arc::new(quiz));
    }

    /// Number of stored quizzes.
    pub fn len(&self) -> usize {
        self.quizzes.read().expect("quiz store lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QuizStore for InMemoryQuizStore {
    fn get_quiz(&self, id: &QuizId) -> Option<Arc<Quiz>> {
        let quizzes = self.quizzes.read().expect("quiz store lock poisoned");
        quizzes.get(id).cloned()
    }
}
