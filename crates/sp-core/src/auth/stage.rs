//! Authentication stage state machine.
//!
//! Defines a pure state transition function for the first-run credential
//! flow. Side effects live in the application layer.

use serde::{Deserialize, Serialize};

/// Where the user is in the credential flow. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStage {
    /// Startup status check has not resolved yet.
    Loading,
    /// No chat provider secret is stored.
    NeedsChatKey,
    /// Chat secret stored, no login profile yet.
    NeedsLogin,
    /// Both chat secret and login profile present.
    Authenticated,
}

impl AuthStage {
    /// Stages in which a chat-provider capture ritual makes sense.
    pub fn accepts_chat_key(&self) -> bool {
        matches!(self, AuthStage::NeedsChatKey | AuthStage::NeedsLogin)
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, AuthStage::Loading)
    }
}

/// Facts that drive the stage forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// Host answered the startup status query.
    StatusResolved { has_chat_key: bool, has_profile: bool },
    /// Host could not be reached during the startup query.
    StatusUnavailable,
    /// A chat-provider secret was persisted.
    ChatKeyStored { has_profile: bool },
    /// Login finished.
    LoginCompleted,
    /// Explicit logout went through on the host.
    LoggedOut { chat_key_removed: bool },
}

/// Pure auth state machine.
pub struct AuthStateMachine;

impl AuthStateMachine {
    /// Compute the next stage. Events that do not apply to the current stage
    /// leave it unchanged.
    pub fn transition(stage: AuthStage, event: AuthEvent) -> AuthStage {
        match (stage, event) {
            (
                AuthStage::Loading,
                AuthEvent::StatusResolved {
                    has_chat_key,
                    has_profile,
                },
            ) => match (has_chat_key, has_profile) {
                (false, _) => AuthStage::NeedsChatKey,
                (true, false) => AuthStage::NeedsLogin,
                (true, true) => AuthStage::Authenticated,
            },
            // Fail open into the setup flow rather than staying stuck.
            (AuthStage::Loading, AuthEvent::StatusUnavailable) => AuthStage::NeedsChatKey,
            (
                AuthStage::NeedsChatKey | AuthStage::NeedsLogin,
                AuthEvent::ChatKeyStored { has_profile },
            ) => {
                if has_profile {
                    AuthStage::Authenticated
                } else {
                    AuthStage::NeedsLogin
                }
            }
            (AuthStage::NeedsLogin, AuthEvent::LoginCompleted) => AuthStage::Authenticated,
            (_, AuthEvent::LoggedOut { chat_key_removed }) => {
                if chat_key_removed {
                    AuthStage::NeedsChatKey
                } else {
                    AuthStage::NeedsLogin
                }
            }
            (stage, _) => stage,
        }
    }
}
