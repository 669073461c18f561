//! Host command/event contract.
//!
//! Names and payload shapes of everything the core exchanges with the
//! privileged host process. The host owns the implementations.

use serde::{Deserialize, Serialize};

/// Request/response commands.
pub mod commands {
    pub const CHECK_FILE_EXISTS: &str = "check_file_exists";
    pub const GET_API_KEY: &str = "get_api_key";
    pub const ENCRYPT_AND_SAVE: &str = "encrypt_and_save";
    pub const RESET_API_KEY: &str = "reset_api_key";
    pub const LOGOUT: &str = "logout";
    pub const START_CLIPBOARD_WATCHER: &str = "start_clipboard_watcher";
    pub const STOP_CLIPBOARD_WATCHER: &str = "stop_clipboard_watcher";
    pub const OPEN_EXTERNAL_URL: &str = "open_external_url";
    pub const OPEN_CAPTURE_SURFACE: &str = "open_imgbb_window";
    pub const CLOSE_CAPTURE_SURFACE: &str = "close_imgbb_window";
    pub const UPLOAD_IMAGE: &str = "upload_image";
    pub const START_CHAT_STREAM: &str = "start_chat_stream";
    pub const SEND_CHAT_TURN: &str = "send_chat_turn";
    pub const GET_SESSION_PATH: &str = "get_session_path";
    pub const READ_IMAGE_FILE: &str = "read_image_file";
}

/// Event topics.
pub mod topics {
    pub const CLIPBOARD_CAPTURED: &str = "clipboard-captured";
    pub const CAPTURE_SURFACE_CLOSED: &str = "capture-surface-closed";
    pub const CHAT_STREAM_TOKEN: &str = "chat-stream-token";
    pub const IMAGE_PATH: &str = "image-path";
}

/// Provider ids.
pub mod providers {
    pub const CHAT: &str = "gemini";
    pub const IMAGE_HOST: &str = "imgbb";
}

/// Files whose existence the host reports.
pub mod files {
    pub const CHAT_KEY: &str = "gemini_key.json";
    pub const IMAGE_HOST_KEY: &str = "imgbb_key.json";
    pub const PROFILE: &str = "profile.json";
}

/// Payload of a `chat-stream-token` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamToken {
    pub stream_id: String,
    pub token: String,
}

/// Reply of `read_image_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFile {
    pub base64: String,
    pub mime_type: String,
}
