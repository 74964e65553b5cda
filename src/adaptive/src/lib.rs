pub mod adjuster;
pub mod ccs;
pub mod quorum;
pub mod window;

// Re-exports for convenience
pub use adjuster::{Adjuster, Decision};
pub use ccs::{CcsComponents, CcsComputer};
pub use quorum::{AdaptiveQuorum, QuorumError, QuorumProvider, StaticQuorum};
pub use window::MetricsWindow;
