//! # Conduit Runtime
//!
//! Turns the Conduit crates into a running node: configuration loading,
//! log setup, explicit construction of every collaborator, and startup and
//! shutdown.

pub mod components;
pub mod node;
pub mod system;

pub use node::Node;
pub use system::{init_tracing, NodeConfig};
