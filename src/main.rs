//! QuizSync Server Binary
//!
//! Starts the WebSocket quiz server with an in-memory quiz store seeded
//! with a demo quiz, so a freshly started server can host a session
//! immediately.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quiz_sync::{
    BroadcastGateway, InMemoryQuizStore, MonotonicClock, Question, Quiz,
    QuizServer, ServerConfig, SessionRegistry, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("QuizSync Server v{}", VERSION);

    let store = Arc::new(InMemoryQuizStore::new());
    let demo = demo_quiz();
    let demo_id = uuid::Uuid::from_bytes(demo.id);
    info!("Seeded demo quiz '{}' ({} questions), id {}", demo.title, demo.questions.len(), demo_id);
    store.insert(demo);

    let gateway = Arc::new(BroadcastGateway::default());
    let clock = Arc::new(MonotonicClock::new());
    let registry = Arc::new(SessionRegistry::new(store, gateway.clone(), clock));

    let config = ServerConfig::default();
    info!("Binding to {}", config.bind_addr);

    let server = QuizServer::new(config, registry, gateway);
    server.run().await?;

    Ok(())
}

/// A small quiz to host out of the box.
fn demo_quiz() -> Quiz {
    Quiz {
        id: uuid::Uuid::new_v4().into_bytes(),
        title: "General Knowledge".to_string(),
        questions: vec![
            Question::new(
                1,
                "Which planet is known as the Red Planet?",
                vec!["Venus".into(), "Mars".into(), "Jupiter".into(), "Mercury".into()],
                1,
            ),
            Question::new(
                2,
                "What is the largest ocean on Earth?",
                vec!["Atlantic".into(), "Indian".into(), "Arctic".into(), "Pacific".into()],
                3,
            ),
            Question::new(
                3,
                "How many continents are there?",
                vec!["5".into(), "6".into(), "7".into(), "8".into()],
                2,
            ),
        ],
    }
}
