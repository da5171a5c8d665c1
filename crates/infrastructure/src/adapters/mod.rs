//! Infrastructure adapters for application ports

mod system_clock;

pub use system_clock::{FixedClock, SystemClock};
