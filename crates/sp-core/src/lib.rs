//! # sp-core
//!
//! Core domain models and ports for the Spatialshot session core.
//!
//! This crate contains pure domain logic without any infrastructure
//! dependencies. Everything that talks to the host process goes through
//! [`ports::EventBridgePort`].

pub mod auth;
pub mod chat;
pub mod config;
pub mod host;
pub mod image;
pub mod lens;
pub mod ports;

// Re-export commonly used types at the crate root
pub use auth::{AuthEvent, AuthStage, AuthStateMachine, ClipboardCapture, ProviderKind};
pub use chat::{ChatMessage, ChatSessionState, ProviderFailure, Role, SessionStage};
pub use config::AppConfig;
pub use image::{ImageKey, ImagePayload};
pub use lens::PrefetchEntry;
