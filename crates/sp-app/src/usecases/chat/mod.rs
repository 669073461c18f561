//! Streaming chat session about the active image.

mod config;
mod engine;
mod optimistic;

pub use config::ChatConfig;
pub use engine::{ChatSessionEngine, SendOutcome, SessionOutcome};
