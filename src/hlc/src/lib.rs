pub mod clock;

pub use clock::{wall_nanos, Clock, ClockDriftError, Hlc};
