//! Spatialshot session core
//!
//! Startup glue for embedding the session core in a host process: load the
//! configuration, install logging, then wire the components on top of the
//! host's event bridge.

pub mod bootstrap;

pub use sp_app::CoreServices;
pub use sp_core::AppConfig;
