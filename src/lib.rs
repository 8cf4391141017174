pub mod config;
pub mod error;
pub mod janitor;
pub mod ledger;
pub mod rpc;
pub mod testing; // Mocks and fixtures for unit and integration tests
pub mod utils;

pub use error::{JanitorError, Result, RpcError};
pub use janitor::{ChainRunner, Scheduler};
