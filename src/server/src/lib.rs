pub mod error;
pub mod http_metrics;
pub mod message;
pub mod node;
pub mod opcodes;
pub mod server;

// Re-exports for convenience
pub use error::ServerError;
pub use message::Message;
pub use node::NodeHandler;
pub use server::Server;
