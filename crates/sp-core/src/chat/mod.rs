//! Chat session domain.

pub mod failure;
pub mod message;
pub mod session;

pub use failure::ProviderFailure;
pub use message::{ChatMessage, Role};
pub use session::{ChatSessionState, SessionStage};
