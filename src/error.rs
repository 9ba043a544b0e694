use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::daemon::protocol::{DaemonKind, MainchainLinkage, StorageConfig};

/// Failure of a single external command
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{program} did not finish within {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {}", exit_label(*code), stderr.trim())]
    Failed {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Why a probe could not read a daemon's RPC state
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("rpc unreachable: {0}")]
    Unreachable(#[from] ExecError),

    #[error("unexpected {call} output: {source}")]
    Parse {
        call: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration that a transition already wrote before failing
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppliedConfig {
    Mainchain(MainchainLinkage),
    Storage(StorageConfig),
}

impl AppliedConfig {
    pub fn daemon(&self) -> DaemonKind {
        match self {
            Self::Mainchain(_) => DaemonKind::SideChain,
            Self::Storage(_) => DaemonKind::BaseChain,
        }
    }
}

/// Failure of a guarded reconfiguration. Each variant names the step that
/// stopped the transition so callers know whether the config file changed.
#[derive(Error, Debug)]
pub enum TransitionError {
    /// Nothing was written
    #[error("precondition not met: {reason}")]
    PreconditionNotMet { reason: String },

    /// Nothing was written
    #[error("prune size {requested_gb} GB is below the minimum of {min_gb} GB")]
    BelowMinimum { requested_gb: f64, min_gb: f64 },

    /// Nothing was written
    #[error("failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Nothing was written (the replace is atomic)
    #[error("failed to write {}: {source}", path.display())]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The new config is on disk but the running daemon still uses the old one
    #[error("config written but restart of {} failed: {source}", applied.daemon())]
    RestartFailed {
        applied: AppliedConfig,
        #[source]
        source: ExecError,
    },

    /// A restart requested on its own, without a config change, failed
    #[error("restart of {kind} failed: {source}")]
    Restart {
        kind: DaemonKind,
        #[source]
        source: ExecError,
    },

    /// Deadline passed before the config was written
    #[error("deadline exceeded during {stage}")]
    Timeout { stage: &'static str },
}

impl TransitionError {
    /// Whether the daemon's config file was modified before the failure
    pub fn config_changed(&self) -> bool {
        matches!(self, Self::RestartFailed { .. })
    }
}

/// Problems loading the manager's own configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Reports store failures
#[derive(Error, Debug)]
pub enum ReportsError {
    #[error("reports database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid report date {0:?}")]
    InvalidDate(String),

    #[error("reports store is not configured")]
    NotConfigured,

    #[error("reports task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, TransitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_exec_message_includes_stderr() {
        let err = ExecError::Failed {
            program: "systemctl".into(),
            code: Some(3),
            stdout: "inactive\n".into(),
            stderr: "unit stopped\n".into(),
        };
        assert_eq!(err.to_string(), "systemctl exited with status 3: unit stopped");
    }

    #[test]
    fn test_only_restart_failure_reports_changed_config() {
        let restart = TransitionError::RestartFailed {
            applied: AppliedConfig::Storage(StorageConfig::full(0.5)),
            source: ExecError::Timeout {
                program: "systemctl".into(),
                after: Duration::from_secs(5),
            },
        };
        assert!(restart.config_changed());
        assert!(restart.to_string().contains("base-chain"));

        let rejected = TransitionError::BelowMinimum {
            requested_gb: 0.1,
            min_gb: 0.5,
        };
        assert!(!rejected.config_changed());
    }
}
