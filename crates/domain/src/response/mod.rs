//! Response domain types

mod spec;
mod timing;

pub use spec::{ResponseHeaders, ResponseSpec, StatusCode};
pub use timing::TimingBreakdown;
