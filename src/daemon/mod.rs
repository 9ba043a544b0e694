//! Supervision and reconfiguration of the node daemons
//!
//! The manager watches three systemd-managed daemons and changes their
//! configuration on request:
//! - Status probes through each daemon's CLI (run confined via `systemd-run`)
//! - Service state from `systemctl`
//! - One health verdict folded from all probes
//! - Guarded config transitions with per-daemon locking
//!
//! # Architecture
//!
//! Nothing here runs in the background. Every call probes, folds or
//! rewrites and then returns; polling is up to the caller.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  nodeplane                     │
//! ├───────────────────────────────────────────────┤
//! │ HealthManager  │  Orchestrator                 │
//! │ (fold)         │  (locks, conf rewrite)        │
//! ├───────────────────────────────────────────────┤
//! │ DaemonProber   │  ServiceManager │ conf files  │
//! ├───────────────────────────────────────────────┤
//! │ CommandExecutor (sudo -n, systemd-run)         │
//! ├───────────────────────────────────────────────┤
//! │     bitcoind   │   elementsd   │     lnd       │
//! └───────────────────────────────────────────────┘
//! ```

pub mod conf;
pub mod executor;
pub mod health;
pub mod orchestrator;
pub mod probe;
pub mod protocol;
pub mod services;

#[cfg(test)]
pub mod testing;

pub use executor::{CommandExecutor, CommandRunner};
pub use health::HealthManager;
pub use orchestrator::Orchestrator;
pub use probe::DaemonProber;
pub use protocol::{DaemonKind, DaemonSnapshot, HealthVerdict, ServiceState};
pub use services::ServiceManager;
