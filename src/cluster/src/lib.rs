pub mod client;
pub mod config;
pub mod coordinator;
pub mod probe;
pub mod types;
pub mod wire;

// Re-exports for convenience
pub use client::PeerClient;
pub use config::{ConfigError, NodeConfig};
pub use coordinator::{Coordinator, CoordinatorError, PeerDirectory, ReplicationReport};
pub use probe::{PeerStatus, Probe};
pub use types::*;
