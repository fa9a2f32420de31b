pub mod config;
pub mod gemini;
pub mod orchestrator;
pub mod prompt;
pub mod protocol;
pub mod search;
pub mod store;
pub mod web_server;

pub use config::Config;
pub use orchestrator::{ChatError, ChatOrchestrator, TurnOutcome};
pub use store::{Role, Turn, Workspace};
