use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::ServiceManagerConfig;
use crate::error::ExecError;

/// Runs one external command and returns its stdout.
///
/// Implementations must spawn exactly one process per call and never retry.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, timeout: Duration, program: &str, args: &[String])
        -> Result<String, ExecError>;
}

/// Identity and working directory a confined command runs with
#[derive(Debug, Clone)]
pub struct RunAs<'a> {
    pub user: &'a str,
    pub working_dir: &'a Path,
}

/// Runs service-manager commands on the host, optionally through `sudo -n`
pub struct CommandExecutor {
    use_sudo: bool,
}

impl CommandExecutor {
    pub fn new(config: &ServiceManagerConfig) -> Self {
        Self {
            use_sudo: config.use_sudo,
        }
    }

    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn run(
        &self,
        timeout: Duration,
        program: &str,
        args: &[String],
    ) -> Result<String, ExecError> {
        debug!("Running command (sudo: {}): {} {:?}", self.use_sudo, program, args);

        let output = match tokio::time::timeout(timeout, self.command(program, args).output()).await
        {
            Ok(result) => result.map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?,
            // The child is left running; only the wait is abandoned
            Err(_) => {
                return Err(ExecError::Timeout {
                    program: program.to_string(),
                    after: timeout,
                })
            }
        };

        debug!("Command finished with exit code: {:?}", output.status.code());

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            Err(ExecError::Failed {
                program: program.to_string(),
                code: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Arguments that make `systemd-run` launch `program` as a transient unit
/// under a fixed identity and working directory, piping output back without
/// a TTY.
pub fn confined_args(run_as: &RunAs<'_>, program: &Path, args: &[String]) -> Vec<String> {
    let mut full = vec![
        "--quiet".to_string(),
        "--wait".to_string(),
        "--pipe".to_string(),
        "--collect".to_string(),
        "--uid".to_string(),
        run_as.user.to_string(),
        "--gid".to_string(),
        run_as.user.to_string(),
        format!("--property=WorkingDirectory={}", run_as.working_dir.display()),
        program.display().to_string(),
    ];
    full.extend(args.iter().cloned());
    full
}
