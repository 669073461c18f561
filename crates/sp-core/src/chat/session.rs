//! Observable state of one conversation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::message::ChatMessage;

/// What the engine is doing right now. Only one request may be in flight,
/// so a single tag replaces independent loading/streaming flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStage {
    Idle,
    /// Fixed warm-up before the initial stream opens.
    WarmingUp,
    /// Initial response is streaming into the floating preview.
    Streaming,
    /// A follow-up turn is pending.
    Sending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionState {
    pub messages: Vec<ChatMessage>,
    /// Floating preview text while not in chat mode.
    pub streaming_text: String,
    pub is_chat_mode: bool,
    pub stage: SessionStage,
    pub error: Option<String>,
    pub last_unconfirmed_message: Option<ChatMessage>,
    /// Id reserved for the floating preview once it becomes message #1.
    pub floating_response_id: Option<String>,
}

impl Default for ChatSessionState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            streaming_text: String::new(),
            is_chat_mode: false,
            stage: SessionStage::Idle,
            error: None,
            last_unconfirmed_message: None,
            floating_response_id: None,
        }
    }
}

impl ChatSessionState {
    pub fn is_loading(&self) -> bool {
        self.stage != SessionStage::Idle
    }

    pub fn is_streaming(&self) -> bool {
        self.stage == SessionStage::Streaming
    }

    /// Forget the previous conversation before a fresh session.
    pub fn reset_for_new_session(&mut self) {
        self.messages.clear();
        self.streaming_text.clear();
        self.is_chat_mode = false;
        self.floating_response_id = None;
        self.last_unconfirmed_message = None;
    }

    /// One-time switch from floating preview to chat mode.
    ///
    /// The preview (if any) becomes message #1. Returns `false` when already
    /// in chat mode.
    pub fn enter_chat_mode(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_chat_mode {
            return false;
        }
        self.is_chat_mode = true;

        if self.streaming_text.is_empty() {
            return true;
        }
        if let Some(id) = self.floating_response_id.take() {
            let preview = std::mem::take(&mut self.streaming_text);
            self.messages = vec![ChatMessage::model(id, preview, now)];
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn entering_chat_mode_promotes_preview_once() {
        let mut state = ChatSessionState {
            streaming_text: "It is a cat.".to_string(),
            floating_response_id: Some("100".to_string()),
            ..Default::default()
        };

        assert!(state.enter_chat_mode(now()));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, "100");
        assert_eq!(state.messages[0].role, Role::Model);
        assert_eq!(state.messages[0].text, "It is a cat.");
        assert!(state.streaming_text.is_empty());

        assert!(!state.enter_chat_mode(now()));
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn entering_chat_mode_without_preview_keeps_history_empty() {
        let mut state = ChatSessionState::default();

        assert!(state.enter_chat_mode(now()));
        assert!(state.is_chat_mode);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn loading_is_derived_from_stage() {
        let mut state = ChatSessionState::default();
        assert!(!state.is_loading());

        state.stage = SessionStage::Streaming;
        assert!(state.is_loading());
        assert!(state.is_streaming());

        state.stage = SessionStage::Sending;
        assert!(state.is_loading());
        assert!(!state.is_streaming());
    }
}
