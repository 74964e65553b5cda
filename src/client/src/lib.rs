pub mod client;
pub mod message;
pub mod opcodes;

pub use client::FluxClient;
pub use message::Message;
