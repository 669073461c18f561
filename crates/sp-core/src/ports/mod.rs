//! Port interfaces for the application layer.
//!
//! Ports define the contract between the orchestration logic and whatever
//! implements the host side. Components depend on these traits only, never
//! on a concrete transport.

pub mod bridge;
mod clock;

pub use bridge::{BridgeError, EventBridgePort, EventSubscription};
pub use clock::*;
