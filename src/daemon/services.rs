use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::executor::CommandRunner;
use super::protocol::ServiceState;
use crate::config::ServiceManagerConfig;
use crate::error::ExecError;

/// Talks to systemd about the node units. Read queries are best effort and
/// never fail; only restart requests report errors.
pub struct ServiceManager {
    runner: Arc<dyn CommandRunner>,
    systemctl: String,
}

impl ServiceManager {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &ServiceManagerConfig) -> Self {
        Self {
            runner,
            systemctl: config.systemctl.clone(),
        }
    }

    /// Classify a unit from `is-active`, falling back to `is-enabled`
    pub async fn resolve(&self, timeout: Duration, unit: &str) -> ServiceState {
        let active = match self.query(timeout, "is-active", unit).await {
            Some(answer) => answer,
            None => return ServiceState::Unknown,
        };
        if matches!(active.as_str(), "active" | "reloading") {
            return ServiceState::Running;
        }

        let state = match self.query(timeout, "is-enabled", unit).await {
            Some(enabled) => classify_inactive(&enabled),
            None => ServiceState::Unknown,
        };
        debug!(unit = %unit, active = %active, state = state.as_str(), "Resolved service state");
        state
    }

    /// Queue a restart without waiting for the unit to come back up
    pub async fn request_restart(&self, timeout: Duration, unit: &str) -> Result<(), ExecError> {
        info!(unit = %unit, "Requesting service restart");
        let args = vec!["restart".to_string(), "--no-block".to_string(), unit.to_string()];
        self.runner.run(timeout, &self.systemctl, &args).await?;
        Ok(())
    }

    /// First line of a systemctl query. Non-zero exits still carry the answer
    /// on stdout; anything without an answer counts as a transport failure.
    async fn query(&self, timeout: Duration, verb: &str, unit: &str) -> Option<String> {
        let args = vec![verb.to_string(), unit.to_string()];
        let stdout = match self.runner.run(timeout, &self.systemctl, &args).await {
            Ok(stdout) => stdout,
            Err(ExecError::Failed { stdout, .. }) if !stdout.trim().is_empty() => stdout,
            Err(e) => {
                warn!(unit = %unit, "systemctl {} failed: {}", verb, e);
                return None;
            }
        };
        stdout.lines().next().map(|l| l.trim().to_string())
    }
}

fn classify_inactive(enabled: &str) -> ServiceState {
    match enabled {
        "enabled" | "enabled-runtime" | "static" | "indirect" | "alias" | "linked"
        | "linked-runtime" | "generated" | "disabled" | "masked" | "masked-runtime" => {
            ServiceState::Stopped
        }
        "not-found" => ServiceState::NotInstalled,
        _ => ServiceState::Unknown,
    }
}
