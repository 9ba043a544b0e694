pub mod clienv;
pub mod config;
pub mod daemon;
pub mod error;
pub mod http_server;
pub mod reports;

pub use config::ManagerConfig;
pub use error::{ExecError, Result, TransitionError};
