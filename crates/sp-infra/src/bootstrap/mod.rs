pub mod tracing;

pub use self::tracing::init_tracing_subscriber;
