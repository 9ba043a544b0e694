use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clienv::{self, EnvVar};
use crate::daemon::protocol::{DaemonKind, MainchainSource};
use crate::error::ConfigError;

/// bitcoind refuses prune targets under 550 MiB
pub const MIN_PRUNE_MIB: u64 = 550;
pub const MIN_PRUNE_GB: f64 = MIN_PRUNE_MIB as f64 / 1024.0;

/// Everything the manager needs to know about the host, resolved once at
/// startup and passed to each component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub server: ServerConfig,
    pub service_manager: ServiceManagerConfig,
    pub probe: ProbeConfig,
    pub bitcoind: DaemonLayout,
    pub elementsd: DaemonLayout,
    pub lnd: DaemonLayout,
    /// Base-chain backend used when the sidechain is set to `remote`
    pub mainchain_remote: RpcEndpoint,
    /// Credentials the sidechain uses against the local bitcoind
    pub mainchain_local_auth: RpcAuth,
    pub storage: StorageLimits,
    pub reports: ReportsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceManagerConfig {
    pub systemctl: String,
    pub systemd_run: String,
    /// Prefix service-manager calls with `sudo -n`
    pub use_sudo: bool,
}

impl Default for ServiceManagerConfig {
    fn default() -> Self {
        Self {
            systemctl: "systemctl".to_string(),
            systemd_run: "systemd-run".to_string(),
            use_sudo: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Whole-probe budget
    pub timeout_secs: u64,
    /// Passed to `-rpcwaittimeout`
    pub rpc_wait_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 6,
            rpc_wait_secs: 5,
        }
    }
}

impl ProbeConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where a daemon lives on disk and how it is run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLayout {
    pub unit: String,
    /// System user the daemon and its CLI run as
    pub user: String,
    pub binary: PathBuf,
    pub cli: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub rpc_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl DaemonLayout {
    pub fn default_for(kind: DaemonKind) -> Self {
        match kind {
            DaemonKind::BaseChain => Self {
                unit: "bitcoind".to_string(),
                user: "bitcoin".to_string(),
                binary: PathBuf::from("/usr/local/bin/bitcoind"),
                cli: PathBuf::from("/usr/local/bin/bitcoin-cli"),
                config_file: PathBuf::from("/data/bitcoin/bitcoin.conf"),
                data_dir: PathBuf::from("/data/bitcoin"),
                rpc_port: 8332,
                network: None,
            },
            DaemonKind::SideChain => Self {
                unit: "elementsd".to_string(),
                user: "elements".to_string(),
                binary: PathBuf::from("/usr/local/bin/elementsd"),
                cli: PathBuf::from("/usr/local/bin/elements-cli"),
                config_file: PathBuf::from("/data/elements/elements.conf"),
                data_dir: PathBuf::from("/data/elements"),
                rpc_port: 7041,
                network: None,
            },
            DaemonKind::Lightning => Self {
                unit: "lnd".to_string(),
                user: "lnd".to_string(),
                binary: PathBuf::from("/usr/local/bin/lnd"),
                cli: PathBuf::from("/usr/local/bin/lncli"),
                config_file: PathBuf::from("/data/lnd/lnd.conf"),
                data_dir: PathBuf::from("/data/lnd"),
                rpc_port: 10009,
                network: Some("mainnet".to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcAuth {
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(flatten)]
    pub auth: RpcAuth,
}

impl Default for RpcEndpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8332,
            auth: RpcAuth::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLimits {
    pub min_prune_gb: f64,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            min_prune_gb: MIN_PRUNE_GB,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// SQLite file; reports are disabled when unset
    pub database: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            service_manager: ServiceManagerConfig::default(),
            probe: ProbeConfig::default(),
            bitcoind: DaemonLayout::default_for(DaemonKind::BaseChain),
            elementsd: DaemonLayout::default_for(DaemonKind::SideChain),
            lnd: DaemonLayout::default_for(DaemonKind::Lightning),
            mainchain_remote: RpcEndpoint::default(),
            mainchain_local_auth: RpcAuth::default(),
            storage: StorageLimits::default(),
            reports: ReportsConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Defaults, then the TOML file, then environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&clienv::config_path())
    }

    /// File at `path`, then environment overrides
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env()?;
        config.normalize();
        Ok(config)
    }

    /// Missing file yields defaults; a malformed one is an error
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::trace!(path = %path.display(), "Loading manager config");

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(host) = clienv::env_opt(EnvVar::NodeplaneHost) {
            self.server.host = host;
        }
        if let Some(port) = clienv::env_opt(EnvVar::NodeplanePort) {
            self.server.port = parse_env(EnvVar::NodeplanePort, &port)?;
        }
        if let Some(use_sudo) = clienv::env_bool(EnvVar::NodeplaneUseSudo) {
            self.service_manager.use_sudo = use_sudo;
        }
        if let Some(db) = clienv::env_opt(EnvVar::NodeplaneReportsDb) {
            self.reports.database = Some(PathBuf::from(db));
        }
        if let Some(secs) = clienv::env_opt(EnvVar::NodeplaneProbeTimeout) {
            self.probe.timeout_secs = parse_env(EnvVar::NodeplaneProbeTimeout, &secs)?;
        }
        if let Some(gb) = clienv::env_opt(EnvVar::NodeplaneMinPruneGb) {
            self.storage.min_prune_gb = parse_env(EnvVar::NodeplaneMinPruneGb, &gb)?;
        }
        if let Some(host) = clienv::env_opt(EnvVar::MainchainRemoteHost) {
            self.mainchain_remote.host = host;
        }
        if let Some(port) = clienv::env_opt(EnvVar::MainchainRemotePort) {
            self.mainchain_remote.port = parse_env(EnvVar::MainchainRemotePort, &port)?;
        }
        if let Some(user) = clienv::env_opt(EnvVar::MainchainRemoteUser) {
            self.mainchain_remote.auth.user = Some(user);
        }
        if let Some(pass) = clienv::env_opt(EnvVar::MainchainRemotePass) {
            self.mainchain_remote.auth.password = Some(pass);
        }
        if let Some(user) = clienv::env_opt(EnvVar::BitcoinRpcUser) {
            self.mainchain_local_auth.user = Some(user);
        }
        if let Some(pass) = clienv::env_opt(EnvVar::BitcoinRpcPass) {
            self.mainchain_local_auth.password = Some(pass);
        }
        Ok(())
    }

    /// Drop credentials that are still installer placeholders
    fn normalize(&mut self) {
        for auth in [&mut self.mainchain_remote.auth, &mut self.mainchain_local_auth] {
            if auth.user.as_deref().is_some_and(clienv::is_placeholder) {
                auth.user = None;
            }
            if auth.password.as_deref().is_some_and(clienv::is_placeholder) {
                auth.password = None;
            }
        }
    }

    pub fn layout(&self, kind: DaemonKind) -> &DaemonLayout {
        match kind {
            DaemonKind::BaseChain => &self.bitcoind,
            DaemonKind::SideChain => &self.elementsd,
            DaemonKind::Lightning => &self.lnd,
        }
    }

    /// Backend the sidechain should use for the given source
    pub fn mainchain_endpoint(&self, source: MainchainSource) -> RpcEndpoint {
        match source {
            MainchainSource::Remote => self.mainchain_remote.clone(),
            MainchainSource::Local => RpcEndpoint {
                host: "127.0.0.1".to_string(),
                port: self.bitcoind.rpc_port,
                auth: self.mainchain_local_auth.clone(),
            },
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: EnvVar, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: var.as_str(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_daemons() {
        let config = ManagerConfig::default();
        assert_eq!(config.layout(DaemonKind::BaseChain).unit, "bitcoind");
        assert_eq!(config.layout(DaemonKind::SideChain).unit, "elementsd");
        assert_eq!(config.layout(DaemonKind::Lightning).unit, "lnd");
        assert_eq!(config.probe.budget(), Duration::from_secs(6));
        assert_eq!(config.storage.min_prune_gb * 1024.0, 550.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ManagerConfig::from_toml(
            r#"
            [server]
            port = 9000

            [mainchain_remote]
            host = "bitcoin.example.net"
            port = 18332
            user = "elements"
            password = "CHANGE_ME"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.mainchain_remote.host, "bitcoin.example.net");
        assert_eq!(config.mainchain_remote.auth.user.as_deref(), Some("elements"));
        assert_eq!(config.mainchain_remote.auth.password, None);
        assert_eq!(config.bitcoind.rpc_port, 8332);
    }

    #[test]
    fn test_local_endpoint_follows_bitcoind_port() {
        let mut config = ManagerConfig::default();
        config.bitcoind.rpc_port = 18443;
        let local = config.mainchain_endpoint(MainchainSource::Local);
        assert_eq!(local.host, "127.0.0.1");
        assert_eq!(local.port, 18443);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::load_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 8420);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "server = [").unwrap();
        assert!(matches!(
            ManagerConfig::load_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
