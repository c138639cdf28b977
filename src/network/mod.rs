//! Network Layer
//!
//! Async front end for real-time quiz play. This layer is
//! **non-deterministic** — all quiz logic runs through `engine/`.

pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod server;

pub use gateway::{BroadcastGateway, Gateway};
pub use protocol::{ClientMessage, ServerMessage, ErrorCode, ProtocolError};
pub use registry::{
    CreatedSession, JoinedSession, RegistryConfig, SessionRegistry, SharedSession,
};
pub use server::{QuizServer, QuizServerError, ServerConfig};
