//! Data model shared by probes, the health aggregator and the orchestrator.
//!
//! Everything here is a plain value object: built fresh for each request,
//! serialized to the caller and dropped. Nothing is cached across polls.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of node daemons this manager supervises.
///
/// Declaration order is the component order used when reporting issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DaemonKind {
    /// bitcoind
    BaseChain,
    /// elementsd
    SideChain,
    /// lnd
    Lightning,
}

impl DaemonKind {
    pub const ALL: [DaemonKind; 3] = [Self::BaseChain, Self::SideChain, Self::Lightning];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaseChain => "base-chain",
            Self::SideChain => "side-chain",
            Self::Lightning => "lightning",
        }
    }

    /// Human label used in issue messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::BaseChain => "bitcoind",
            Self::SideChain => "elementsd",
            Self::Lightning => "lnd",
        }
    }
}

impl fmt::Display for DaemonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DaemonKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base-chain" | "basechain" | "bitcoin" | "bitcoind" => Ok(Self::BaseChain),
            "side-chain" | "sidechain" | "elements" | "elementsd" => Ok(Self::SideChain),
            "lightning" | "lnd" => Ok(Self::Lightning),
            other => Err(format!("unknown daemon kind: {other}")),
        }
    }
}

/// Service-manager level state of a daemon unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Unit or binary is not present on this host
    NotInstalled,
    /// Unit is known but not active
    Stopped,
    /// The service manager could not be asked, or gave an unrecognised answer
    #[default]
    Unknown,
    /// Unit is active
    Running,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
            Self::Running => "running",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Where the sidechain daemon gets its base-chain data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MainchainSource {
    Remote,
    Local,
}

impl MainchainSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for MainchainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MainchainSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown mainchain source: {other}")),
        }
    }
}

/// The sidechain's trust anchor and how to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainchainLinkage {
    pub source: MainchainSource,
    pub rpc_host: String,
    pub rpc_port: u16,
    /// Whether the local base-chain daemon could serve as the backend right now
    pub local_ready: bool,
}

impl MainchainLinkage {
    /// Fill `local_ready` from a base-chain snapshot taken in the same poll
    pub fn with_local_ready(mut self, base: &DaemonSnapshot) -> Self {
        self.local_ready = base.is_fully_synced();
        self
    }
}

/// Headers may run a block ahead of the validated tip for a few seconds
/// while a new block is processed.
pub const TIP_TOLERANCE: u64 = 1;

/// Point-in-time view of one daemon.
///
/// Optional fields are only populated when the query that yields them
/// succeeded. `None` means "not known", which is different from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSnapshot {
    pub kind: DaemonKind,
    pub installed: bool,
    pub service_state: ServiceState,
    pub rpc_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_height: Option<u64>,
    /// Raw value reported by the daemon, not clamped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_initial_block_download: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_bytes_used: Option<u64>,
    /// Sidechain only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mainchain: Option<MainchainLinkage>,
}

impl DaemonSnapshot {
    pub fn new(kind: DaemonKind) -> Self {
        Self {
            kind,
            installed: false,
            service_state: ServiceState::default(),
            rpc_ok: false,
            rpc_error: None,
            chain_name: None,
            block_height: None,
            header_height: None,
            verification_progress: None,
            in_initial_block_download: None,
            peer_count: None,
            version_string: None,
            disk_bytes_used: None,
            mainchain: None,
        }
    }

    pub fn not_installed(kind: DaemonKind) -> Self {
        Self {
            service_state: ServiceState::NotInstalled,
            ..Self::new(kind)
        }
    }

    /// How many blocks the daemon trails its best known header
    pub fn blocks_behind(&self) -> Option<u64> {
        match (self.block_height, self.header_height) {
            (Some(blocks), Some(headers)) => Some(headers.saturating_sub(blocks)),
            _ => None,
        }
    }

    /// Reachable over RPC, out of initial block download and within
    /// [`TIP_TOLERANCE`] blocks of the best known header.
    pub fn is_fully_synced(&self) -> bool {
        if !self.rpc_ok || self.in_initial_block_download != Some(false) {
            return false;
        }
        match (self.blocks_behind(), self.block_height) {
            (Some(behind), _) => behind <= TIP_TOLERANCE,
            // lnd reports no header height; synced_to_chain already covers it
            (None, Some(_)) => true,
            (None, None) => false,
        }
    }

    /// True when any sync or peer data was filled in
    pub fn has_chain_data(&self) -> bool {
        self.chain_name.is_some()
            || self.block_height.is_some()
            || self.header_height.is_some()
            || self.verification_progress.is_some()
            || self.in_initial_block_download.is_some()
            || self.peer_count.is_some()
            || self.version_string.is_some()
            || self.disk_bytes_used.is_some()
    }
}

/// A probe that could not produce a snapshot at all (e.g. it overran its
/// deadline as a whole).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: DaemonKind,
    /// Whether the daemon was known to be installed when the probe failed
    pub installed: bool,
    pub reason: String,
}

/// Result of probing one daemon, as fed to the aggregator
pub type ProbeOutcome = std::result::Result<DaemonSnapshot, ProbeFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Full,
    Pruned,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Pruned => "pruned",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "pruned" | "prune" => Ok(Self::Pruned),
            other => Err(format!("unknown storage mode: {other}")),
        }
    }
}

/// Base-chain storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// Target size in GiB; only meaningful when pruned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune_size_gb: Option<f64>,
    /// Smallest prune target the daemon accepts
    pub min_prune_gb: f64,
}

impl StorageConfig {
    pub fn full(min_prune_gb: f64) -> Self {
        Self {
            mode: StorageMode::Full,
            prune_size_gb: None,
            min_prune_gb,
        }
    }

    pub fn pruned(size_gb: Option<f64>, min_prune_gb: f64) -> Self {
        Self {
            mode: StorageMode::Pruned,
            prune_size_gb: size_gb,
            min_prune_gb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthLevel {
    Ok,
    Warn,
    Err,
}

/// Which part of the system an issue belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Component {
    Daemon(DaemonKind),
    Check(String),
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daemon(kind) => write!(f, "{}", kind),
            Self::Check(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub component: Component,
    pub level: HealthLevel,
    pub message: String,
}

/// Process-wide health summary.
///
/// `issues` follows component order (daemons first, then extra checks), not
/// severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub overall: HealthLevel,
    pub issues: Vec<Issue>,
}

impl HealthVerdict {
    pub fn is_ok(&self) -> bool {
        self.overall == HealthLevel::Ok
    }

    pub fn issue_for(&self, component: &Component) -> Option<&Issue> {
        self.issues.iter().find(|i| &i.component == component)
    }
}
