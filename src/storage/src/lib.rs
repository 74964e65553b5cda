pub mod compression;
pub mod staleness;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use staleness::{Detector, StalenessError};
pub use store::Store;
pub use types::{Payload, VersionedValue};
