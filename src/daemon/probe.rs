//! Per-daemon status probes.
//!
//! All three kinds follow the same shape: installed check, service state,
//! then two read-only RPC queries through the daemon's CLI. Whatever the
//! first query yields is kept even when the second one fails.

use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::conf::{keys, ConfFile};
use super::executor::{confined_args, CommandRunner, RunAs};
use super::protocol::{DaemonKind, DaemonSnapshot, MainchainLinkage, MainchainSource, ServiceState};
use super::services::ServiceManager;
use crate::config::{DaemonLayout, ManagerConfig};
use crate::error::ProbeError;

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    chain: String,
    blocks: u64,
    headers: u64,
    verificationprogress: f64,
    initialblockdownload: bool,
    #[serde(default)]
    size_on_disk: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    version: u64,
    #[serde(default)]
    subversion: String,
    connections: u32,
}

#[derive(Debug, Deserialize)]
struct LndInfo {
    version: String,
    block_height: u64,
    synced_to_chain: bool,
    #[serde(default)]
    chains: Vec<LndChain>,
}

#[derive(Debug, Deserialize)]
struct LndChain {
    network: String,
}

#[derive(Debug, Deserialize)]
struct LndPeers {
    peers: Vec<serde_json::Value>,
}

pub struct DaemonProber {
    runner: Arc<dyn CommandRunner>,
    services: ServiceManager,
    config: Arc<ManagerConfig>,
    systemd_run: String,
}

impl DaemonProber {
    pub fn new(runner: Arc<dyn CommandRunner>, config: Arc<ManagerConfig>) -> Self {
        Self {
            services: ServiceManager::new(Arc::clone(&runner), &config.service_manager),
            systemd_run: config.service_manager.systemd_run.clone(),
            runner,
            config,
        }
    }

    pub fn services(&self) -> &ServiceManager {
        &self.services
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Probe with the configured budget
    pub async fn probe(&self, kind: DaemonKind) -> DaemonSnapshot {
        self.probe_within(kind, self.config.probe.budget()).await
    }

    pub async fn probe_within(&self, kind: DaemonKind, budget: Duration) -> DaemonSnapshot {
        let deadline = Instant::now() + budget;
        let layout = self.config.layout(kind);

        if !tokio::fs::try_exists(&layout.binary).await.unwrap_or(false) {
            debug!(kind = %kind, binary = %layout.binary.display(), "Daemon not installed");
            return DaemonSnapshot::not_installed(kind);
        }

        let mut snap = DaemonSnapshot::new(kind);
        snap.installed = true;

        if kind == DaemonKind::SideChain {
            snap.mainchain = Some(read_linkage(&self.config, layout).await);
        }

        snap.service_state = self.services.resolve(remaining(deadline), &layout.unit).await;
        if snap.service_state == ServiceState::NotInstalled {
            // binary present but no unit: still an installed daemon we cannot run
            snap.service_state = ServiceState::Unknown;
        }
        if !snap.service_state.is_running() {
            return snap;
        }

        match self.query_rpc(kind, layout, deadline, &mut snap).await {
            Ok(()) => snap.rpc_ok = true,
            Err(e) => {
                warn!(kind = %kind, "Probe degraded: {}", e);
                snap.rpc_ok = false;
                snap.rpc_error = Some(e.to_string());
            }
        }
        snap
    }

    async fn query_rpc(
        &self,
        kind: DaemonKind,
        layout: &DaemonLayout,
        deadline: Instant,
        snap: &mut DaemonSnapshot,
    ) -> Result<(), ProbeError> {
        match kind {
            DaemonKind::BaseChain | DaemonKind::SideChain => {
                let out = self.cli(kind, layout, deadline, "getblockchaininfo").await?;
                let chain: BlockchainInfo = parse("getblockchaininfo", &out)?;
                snap.chain_name = Some(chain.chain);
                snap.block_height = Some(chain.blocks);
                snap.header_height = Some(chain.headers);
                snap.verification_progress = Some(chain.verificationprogress);
                snap.in_initial_block_download = Some(chain.initialblockdownload);
                snap.disk_bytes_used = chain.size_on_disk;

                let out = self.cli(kind, layout, deadline, "getnetworkinfo").await?;
                let net: NetworkInfo = parse("getnetworkinfo", &out)?;
                snap.peer_count = Some(net.connections);
                snap.version_string = Some(if net.subversion.is_empty() {
                    net.version.to_string()
                } else {
                    net.subversion.trim_matches('/').to_string()
                });
            }
            DaemonKind::Lightning => {
                let out = self.cli(kind, layout, deadline, "getinfo").await?;
                let info: LndInfo = parse("getinfo", &out)?;
                snap.chain_name = info.chains.first().map(|c| c.network.clone());
                snap.block_height = Some(info.block_height);
                snap.in_initial_block_download = Some(!info.synced_to_chain);
                snap.version_string = Some(info.version);

                let out = self.cli(kind, layout, deadline, "listpeers").await?;
                let peers: LndPeers = parse("listpeers", &out)?;
                snap.peer_count = Some(peers.peers.len() as u32);
            }
        }
        Ok(())
    }

    /// One confined CLI call against the daemon's RPC interface
    async fn cli(
        &self,
        kind: DaemonKind,
        layout: &DaemonLayout,
        deadline: Instant,
        rpc: &str,
    ) -> Result<String, ProbeError> {
        let args = cli_args(kind, layout, self.config.probe.rpc_wait_secs, rpc);
        let run_as = RunAs {
            user: &layout.user,
            working_dir: &layout.data_dir,
        };
        let full = confined_args(&run_as, &layout.cli, &args);
        let out = self
            .runner
            .run(remaining(deadline), &self.systemd_run, &full)
            .await?;
        Ok(out.trim().to_string())
    }
}

pub(crate) fn cli_args(
    kind: DaemonKind,
    layout: &DaemonLayout,
    rpc_wait_secs: u64,
    rpc: &str,
) -> Vec<String> {
    if kind == DaemonKind::Lightning {
        let mut args = vec![format!("--lnddir={}", layout.data_dir.display())];
        if let Some(network) = &layout.network {
            args.push(format!("--network={network}"));
        }
        args.push(rpc.to_string());
        return args;
    }
    vec![
        format!("-conf={}", layout.config_file.display()),
        format!("-datadir={}", layout.data_dir.display()),
        "-rpcwait".to_string(),
        format!("-rpcwaittimeout={rpc_wait_secs}"),
        rpc.to_string(),
    ]
}

fn parse<T: serde::de::DeserializeOwned>(call: &'static str, out: &str) -> Result<T, ProbeError> {
    serde_json::from_str(out).map_err(|source| ProbeError::Parse { call, source })
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Read the sidechain's mainchain settings, falling back to the configured
/// endpoint for the selected source when the file has no override.
pub async fn read_linkage(config: &ManagerConfig, layout: &DaemonLayout) -> MainchainLinkage {
    match ConfFile::load_for(&layout.config_file, DaemonKind::SideChain).await {
        Ok(conf) => linkage_from_conf(&conf, config),
        Err(e) => {
            debug!("Could not read {}: {}", layout.config_file.display(), e);
            linkage_from_conf(&ConfFile::default(), config)
        }
    }
}

pub fn linkage_from_conf(conf: &ConfFile, config: &ManagerConfig) -> MainchainLinkage {
    let host = conf.get(keys::MAINCHAIN_RPC_HOST).filter(|h| !h.is_empty());
    let port = conf
        .get(keys::MAINCHAIN_RPC_PORT)
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0);

    let source = conf
        .marker(keys::MAINCHAIN_SOURCE)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| match host {
            Some(h) if is_loopback(h) => MainchainSource::Local,
            _ => MainchainSource::Remote,
        });

    let fallback = config.mainchain_endpoint(source);
    MainchainLinkage {
        source,
        rpc_host: host.map(str::to_string).unwrap_or(fallback.host),
        rpc_port: port.unwrap_or(fallback.port),
        local_ready: false,
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}
