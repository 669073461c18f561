pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod time;

pub use bridge::{LoopbackBridge, LoopbackEmitter, RecordedCall};
pub use time::SystemClock;
