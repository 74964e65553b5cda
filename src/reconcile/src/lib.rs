pub mod engine;
pub mod write_log;

pub use engine::Engine;
pub use write_log::{RecentWriteLog, WriteEntry};
