//! Use cases of the session core.

pub mod chat;
pub mod credentials;
pub mod image_source;
pub mod lens;
