//! Scripted command runner for unit tests.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::executor::CommandRunner;
use super::probe::cli_args;
use super::protocol::DaemonKind;
use crate::config::ManagerConfig;
use crate::error::ExecError;

#[derive(Debug, Clone)]
pub enum Reply {
    Stdout(String),
    Exit { code: i32, stdout: String },
    Timeout,
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Stdout(stdout.into())
    }

    pub fn exit(code: i32, stdout: impl Into<String>) -> Self {
        Self::Exit {
            code,
            stdout: stdout.into(),
        }
    }
}

/// Answers each command line with the most recently registered reply whose
/// needle occurs in it. Unmatched commands fail with exit status 127.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, needle: &str, reply: Reply) -> &Self {
        self.rules.lock().unwrap().push((needle.to_string(), reply));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    fn lookup(&self, line: &str) -> Option<Reply> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        timeout: Duration,
        program: &str,
        args: &[String],
    ) -> Result<String, ExecError> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());

        let mut reply = self.lookup(&line).unwrap_or(Reply::Exit {
            code: 127,
            stdout: String::new(),
        });
        loop {
            match reply {
                Reply::Stdout(out) => return Ok(out),
                Reply::Exit { code, stdout } => {
                    return Err(ExecError::Failed {
                        program: program.to_string(),
                        code: Some(code),
                        stdout,
                        stderr: String::new(),
                    })
                }
                Reply::Timeout => {
                    return Err(ExecError::Timeout {
                        program: program.to_string(),
                        after: timeout,
                    })
                }
                Reply::Delayed(delay, inner) => {
                    if delay > timeout {
                        tokio::time::sleep(timeout).await;
                        return Err(ExecError::Timeout {
                            program: program.to_string(),
                            after: timeout,
                        });
                    }
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// Config whose daemon files all live under `dir`
pub fn layout_config(dir: &Path) -> ManagerConfig {
    let mut config = ManagerConfig::default();
    for kind in DaemonKind::ALL {
        let base = dir.join(kind.as_str());
        std::fs::create_dir_all(&base).unwrap();
        let layout = match kind {
            DaemonKind::BaseChain => &mut config.bitcoind,
            DaemonKind::SideChain => &mut config.elementsd,
            DaemonKind::Lightning => &mut config.lnd,
        };
        layout.binary = base.join("daemon");
        layout.cli = base.join("cli");
        layout.config_file = base.join("daemon.conf");
        layout.data_dir = base.clone();
    }
    config.mainchain_remote.host = "203.0.113.10".into();
    config.mainchain_remote.port = 8332;
    config
}

/// Put a daemon binary (and a minimal config if none exists) in place
pub fn install(config: &ManagerConfig, kind: DaemonKind) {
    let layout = config.layout(kind);
    std::fs::write(&layout.binary, "").unwrap();
    if !layout.config_file.exists() {
        std::fs::write(&layout.config_file, "server=1\n").unwrap();
    }
}

pub const CHAIN_INFO: &str = r#"{"chain":"main","blocks":850000,"headers":850000,"verificationprogress":0.9999998,"initialblockdownload":false,"size_on_disk":650000000000}"#;
pub const NET_INFO: &str = r#"{"version":270100,"subversion":"/Satoshi:27.1.0/","connections":10}"#;
pub const LND_INFO: &str = r#"{"version":"0.18.3-beta","block_height":850000,"synced_to_chain":true,"chains":[{"chain":"bitcoin","network":"mainnet"}]}"#;

/// Needle matching one RPC call of one daemon
pub fn rpc_needle(config: &ManagerConfig, kind: DaemonKind, rpc: &str) -> String {
    cli_args(kind, config.layout(kind), config.probe.rpc_wait_secs, rpc).join(" ")
}

/// Script a daemon as active with healthy, synced RPC answers
pub fn script_running(runner: &ScriptedRunner, config: &ManagerConfig, kind: DaemonKind) {
    runner.on(
        &format!("is-active {}", config.layout(kind).unit),
        Reply::ok("active\n"),
    );
    let calls = match kind {
        DaemonKind::Lightning => [("getinfo", LND_INFO), ("listpeers", r#"{"peers":[]}"#)],
        _ => [("getblockchaininfo", CHAIN_INFO), ("getnetworkinfo", NET_INFO)],
    };
    for (rpc, reply) in calls {
        runner.on(&rpc_needle(config, kind, rpc), Reply::ok(reply));
    }
}
