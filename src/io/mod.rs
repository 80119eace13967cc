//! IO modules - external system interfaces
//!
//! - `gateway` - Remote simulation gateway contract, errors and request validation
//! - `http_gateway` - reqwest implementation of the gateway against `<base>/api`
//! - `mock_server` - In-memory hyper server speaking the same contract

pub mod gateway;
pub mod http_gateway;
pub mod mock_server;

// Re-export commonly used types
pub use gateway::{GatewayError, SimulationGateway};
pub use http_gateway::HttpGateway;
