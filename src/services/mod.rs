//! Services - console state and its runtime
//!
//! - `session` - View/selection state machine (reducer + effects)
//! - `poller` - Live polling coordinator (one interval loop, sequence-stamped results)
//! - `dispatcher` - Operator commands against the gateway, in-flight gating
//! - `controller` - Runs session effects and feeds results back

pub mod controller;
pub mod dispatcher;
pub mod poller;
pub mod session;

#[cfg(test)]
pub(crate) mod fake_gateway;

// Re-export commonly used types
pub use controller::Controller;
pub use dispatcher::{Command, CommandDispatcher, CommandOutcome, Control};
pub use poller::{PollingCoordinator, Refresh};
pub use session::{Action, Effect, Session};
