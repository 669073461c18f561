//! Reverse image search link with an opportunistic prefetch.

mod config;
mod prefetch;

pub use config::LensConfig;
pub use prefetch::{LensError, LensState, PrefetchCache, TriggerOutcome};
