//! Node-level system concerns: configuration and logging.

pub mod config;
pub mod logging;

pub use config::NodeConfig;
pub use logging::init_tracing;
