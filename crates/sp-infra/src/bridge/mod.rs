mod loopback;

pub use loopback::{LoopbackBridge, LoopbackEmitter, RecordedCall};
