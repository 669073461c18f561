//! Credential domain: which provider secrets exist and where the user is in
//! the first-run flow.

pub mod provider;
pub mod stage;

pub use provider::{ClipboardCapture, ProviderKind};
pub use stage::{AuthEvent, AuthStage, AuthStateMachine};
