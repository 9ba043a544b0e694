//! Guarded reconfiguration of the node daemons.
//!
//! Both transitions run the same steps under the target daemon's lock:
//! check preconditions, rewrite the config file atomically, then ask
//! systemd for a non-blocking restart. Callers get "accepted" once the
//! restart is queued and watch later probes for convergence.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::conf::{keys, write_atomic, ConfFile};
use super::probe::DaemonProber;
use super::protocol::{
    DaemonKind, DaemonSnapshot, MainchainLinkage, MainchainSource, ServiceState, StorageConfig,
    StorageMode,
};
use crate::error::{AppliedConfig, Result, TransitionError};

/// What happened to the restart after the config was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartRequest {
    /// Queued with systemd; the daemon may still be coming up
    Requested,
    /// Takes effect on the next restart, whatever triggers it
    Deferred,
}

/// A transition whose config is on disk. Not a promise the daemon is
/// already running with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub applied: AppliedConfig,
    pub restart: RestartRequest,
}

/// One exclusive lock per daemon, so transitions on different daemons can
/// overlap while two on the same daemon cannot.
#[derive(Default)]
struct DaemonLocks {
    base_chain: Mutex<()>,
    side_chain: Mutex<()>,
    lightning: Mutex<()>,
}

impl DaemonLocks {
    fn get(&self, kind: DaemonKind) -> &Mutex<()> {
        match kind {
            DaemonKind::BaseChain => &self.base_chain,
            DaemonKind::SideChain => &self.side_chain,
            DaemonKind::Lightning => &self.lightning,
        }
    }
}

pub struct Orchestrator {
    prober: Arc<DaemonProber>,
    locks: DaemonLocks,
}

impl Orchestrator {
    pub fn new(prober: Arc<DaemonProber>) -> Self {
        Self {
            prober,
            locks: DaemonLocks::default(),
        }
    }

    /// Deadline for a transition started now, from the configured probe budget
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + self.prober.config().probe.budget() * 2
    }

    async fn lock(&self, kind: DaemonKind, deadline: Instant) -> Result<MutexGuard<'_, ()>> {
        tokio::time::timeout_at(deadline, self.locks.get(kind).lock())
            .await
            .map_err(|_| TransitionError::Timeout {
                stage: "waiting for another transition",
            })
    }

    /// Point the sidechain at a remote or the local base-chain backend
    pub async fn switch_mainchain(
        &self,
        target: MainchainSource,
        deadline: Instant,
    ) -> Result<Accepted> {
        let _guard = self.lock(DaemonKind::SideChain, deadline).await?;
        let config = self.prober.config();
        info!(target = %target, "Mainchain source switch requested");

        let mut local_ready = false;
        if target == MainchainSource::Local {
            // always a fresh probe, never a cached snapshot
            let base = self
                .prober
                .probe_within(DaemonKind::BaseChain, remaining(deadline))
                .await;
            if !base.is_fully_synced() {
                let reason = not_ready_reason(&base);
                warn!("Refusing switch to local mainchain: {}", reason);
                return Err(TransitionError::PreconditionNotMet { reason });
            }
            local_ready = true;
        }
        ensure_time_left(deadline, "precondition check")?;

        let path = &config.elementsd.config_file;
        let mut conf = ConfFile::load_for(path, DaemonKind::SideChain)
            .await
            .map_err(|source| TransitionError::ConfigRead {
                path: path.clone(),
                source,
            })?;

        let endpoint = config.mainchain_endpoint(target);
        conf.set(keys::MAINCHAIN_RPC_HOST, &endpoint.host);
        conf.set(keys::MAINCHAIN_RPC_PORT, &endpoint.port.to_string());
        set_or_remove(&mut conf, keys::MAINCHAIN_RPC_USER, endpoint.auth.user.as_deref());
        set_or_remove(
            &mut conf,
            keys::MAINCHAIN_RPC_PASSWORD,
            endpoint.auth.password.as_deref(),
        );
        conf.set_marker(keys::MAINCHAIN_SOURCE, target.as_str());

        ensure_time_left(deadline, "config write")?;
        write_conf(path, &conf).await?;

        let applied = AppliedConfig::Mainchain(MainchainLinkage {
            source: target,
            rpc_host: endpoint.host,
            rpc_port: endpoint.port,
            local_ready,
        });
        self.restart_applied(applied, deadline).await
    }

    /// Switch the base chain between full and pruned storage.
    ///
    /// Pruned without a size enables manual pruning (`prune=1`). Going back
    /// to full is written like any other change; whether the daemon accepts
    /// it without a resync shows up in later probes.
    pub async fn switch_storage(
        &self,
        mode: StorageMode,
        prune_size_gb: Option<f64>,
        apply_now: bool,
        deadline: Instant,
    ) -> Result<Accepted> {
        let _guard = self.lock(DaemonKind::BaseChain, deadline).await?;
        let config = self.prober.config();
        let min_gb = config.storage.min_prune_gb;
        info!(mode = ?mode, size_gb = ?prune_size_gb, apply_now, "Storage mode switch requested");

        let target = match mode {
            StorageMode::Full => StorageConfig::full(min_gb),
            StorageMode::Pruned => {
                if let Some(size) = prune_size_gb {
                    // also rejects NaN
                    if !(size >= min_gb) {
                        warn!("Refusing prune size {} GB below {} GB", size, min_gb);
                        return Err(TransitionError::BelowMinimum {
                            requested_gb: size,
                            min_gb,
                        });
                    }
                }
                StorageConfig::pruned(prune_size_gb, min_gb)
            }
        };
        ensure_time_left(deadline, "precondition check")?;

        let path = &config.bitcoind.config_file;
        let mut conf = ConfFile::load_for(path, DaemonKind::BaseChain)
            .await
            .map_err(|source| TransitionError::ConfigRead {
                path: path.clone(),
                source,
            })?;

        match (target.mode, target.prune_size_gb) {
            (StorageMode::Full, _) => {
                conf.remove(keys::PRUNE);
            }
            (StorageMode::Pruned, Some(size)) => conf.set(keys::PRUNE, &gb_to_mib(size).to_string()),
            (StorageMode::Pruned, None) => conf.set(keys::PRUNE, "1"),
        }

        ensure_time_left(deadline, "config write")?;
        write_conf(path, &conf).await?;

        let applied = AppliedConfig::Storage(target);
        if !apply_now {
            info!("Storage change written; restart deferred");
            return Ok(Accepted {
                applied,
                restart: RestartRequest::Deferred,
            });
        }
        self.restart_applied(applied, deadline).await
    }

    /// Storage settings as currently written in the base chain's config
    pub async fn current_storage(&self) -> Result<StorageConfig> {
        let config = self.prober.config();
        let path = &config.bitcoind.config_file;
        let conf = ConfFile::load_for(path, DaemonKind::BaseChain)
            .await
            .map_err(|source| TransitionError::ConfigRead {
                path: path.clone(),
                source,
            })?;
        Ok(storage_from_conf(&conf, config.storage.min_prune_gb))
    }

    /// Restart a daemon without touching its config, e.g. to retry after
    /// a `RestartFailed`
    pub async fn retry_restart(&self, kind: DaemonKind, deadline: Instant) -> Result<()> {
        let _guard = self.lock(kind, deadline).await?;
        let unit = &self.prober.config().layout(kind).unit;
        self.prober
            .services()
            .request_restart(remaining(deadline), unit)
            .await
            .map_err(|source| {
                error!(kind = %kind, "Restart request failed: {}", source);
                TransitionError::Restart { kind, source }
            })
    }

    async fn restart_applied(&self, applied: AppliedConfig, deadline: Instant) -> Result<Accepted> {
        let kind = applied.daemon();
        let unit = &self.prober.config().layout(kind).unit;
        match self
            .prober
            .services()
            .request_restart(remaining(deadline), unit)
            .await
        {
            Ok(()) => {
                info!(kind = %kind, "Config applied, restart requested");
                Ok(Accepted {
                    applied,
                    restart: RestartRequest::Requested,
                })
            }
            Err(source) => {
                error!(kind = %kind, "Config written but restart failed: {}", source);
                Err(TransitionError::RestartFailed { applied, source })
            }
        }
    }
}

/// Read storage mode from `prune=<MiB>`
pub fn storage_from_conf(conf: &ConfFile, min_prune_gb: f64) -> StorageConfig {
    let prune = conf.get(keys::PRUNE).map(|v| v.parse::<u64>());
    match prune {
        None | Some(Ok(0)) => StorageConfig::full(min_prune_gb),
        Some(Ok(1)) => StorageConfig::pruned(None, min_prune_gb),
        Some(Ok(mib)) => StorageConfig::pruned(Some(mib as f64 / 1024.0), min_prune_gb),
        Some(Err(_)) => {
            warn!("Unreadable prune value, treating storage as full");
            StorageConfig::full(min_prune_gb)
        }
    }
}

fn gb_to_mib(gb: f64) -> u64 {
    (gb * 1024.0).round() as u64
}

fn set_or_remove(conf: &mut ConfFile, key: &str, value: Option<&str>) {
    match value {
        Some(v) => conf.set(key, v),
        None => {
            conf.remove(key);
        }
    }
}

async fn write_conf(path: &std::path::Path, conf: &ConfFile) -> Result<()> {
    write_atomic(path, &conf.render()).await.map_err(|source| {
        error!("Failed to write {}: {}", path.display(), source);
        TransitionError::ConfigWriteFailed {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn not_ready_reason(base: &DaemonSnapshot) -> String {
    let label = base.kind.label();
    if !base.installed {
        return format!("{label} is not installed");
    }
    if base.service_state != ServiceState::Running {
        return format!("{label} is not running ({})", base.service_state.as_str());
    }
    if !base.rpc_ok {
        return format!("{label} RPC is unreachable");
    }
    match (base.block_height, base.header_height) {
        (Some(blocks), Some(headers)) if blocks < headers => {
            format!("{label} is not fully synced ({blocks} of {headers} blocks)")
        }
        _ => format!("{label} is not fully synced"),
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn ensure_time_left(deadline: Instant, stage: &'static str) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(TransitionError::Timeout { stage });
    }
    Ok(())
}
