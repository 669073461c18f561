use sp_core::{AuthStage, ProviderKind};

use crate::host::HostError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    /// Another provider's capture ritual owns the watcher.
    #[error("a capture ritual for {active} is already in flight")]
    RitualInFlight { active: ProviderKind },

    /// A conflicting credential operation is already running.
    #[error("another credential operation is in progress")]
    Busy,

    #[error("operation not available at stage {stage:?}")]
    StageMismatch { stage: AuthStage },

    #[error("no secret stored for {0}")]
    CredentialMissing(ProviderKind),

    /// Secret save or delete failed on the host.
    #[error("failed to persist secret: {0}")]
    Persistence(String),

    #[error("host command failed: {0}")]
    Host(#[from] HostError),
}
