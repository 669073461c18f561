//! Spatialshot Session Orchestration Layer
//!
//! Use cases that coordinate the host process (through
//! [`sp_core::ports::EventBridgePort`]) with the state the UI observes.

pub mod host;
pub mod services;
pub mod usecases;

pub use host::{HostClient, HostError};
pub use services::CoreServices;
pub use usecases::{
    chat::{ChatConfig, ChatSessionEngine, SendOutcome, SessionOutcome},
    credentials::{CaptureWatcher, CredentialProvisioner, ProvisionError, ProvisionerConfig},
    image_source::ActiveImageSource,
    lens::{LensConfig, LensError, LensState, PrefetchCache, TriggerOutcome},
};
