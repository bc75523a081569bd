// Risk management module
pub mod limits;

pub use limits::{ExitReason, RiskLimits};
