//! First-run credential provisioning: the capture ritual and auth stage.

mod config;
mod error;
mod provisioner;
mod watcher;

pub use config::ProvisionerConfig;
pub use error::ProvisionError;
pub use provisioner::{CredentialProvisioner, ProvisionerState};
pub use watcher::{CaptureWatcher, WatcherStart};
