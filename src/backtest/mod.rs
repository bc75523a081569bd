pub mod metrics;
pub mod runner;

pub use metrics::{BacktestMetrics, RoundTrip};
pub use runner::BacktestRunner;
