pub mod config;
pub mod runtime;
pub mod tracing;

pub use config::load_config;
pub use runtime::ContentStoreRuntime;
pub use self::tracing::init_tracing_subscriber;
