// Position state machine and order execution
pub mod controller;
pub mod executor;

pub use controller::{drift_reason, Phase, PositionController, Transition};
pub use executor::{idempotency_key, ExecutionOutcome, OrderExecutor};
