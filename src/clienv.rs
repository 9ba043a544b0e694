//! Environment variables recognised by the manager.
//!
//! Only `ManagerConfig::load` reads these; components receive the resolved
//! config struct instead of looking at the environment themselves.

use std::path::PathBuf;

macro_rules! env_vars {
    ($($variant:ident => $name:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum EnvVar {
            $($variant),*
        }

        impl EnvVar {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),*
                }
            }
        }
    };
}

env_vars! {
    NodeplaneConfig        => "NODEPLANE_CONFIG",
    NodeplaneHost          => "NODEPLANE_HOST",
    NodeplanePort          => "NODEPLANE_PORT",
    NodeplaneUseSudo       => "NODEPLANE_USE_SUDO",
    NodeplaneReportsDb     => "NODEPLANE_REPORTS_DB",
    NodeplaneProbeTimeout  => "NODEPLANE_PROBE_TIMEOUT_SECS",
    NodeplaneMinPruneGb    => "NODEPLANE_MIN_PRUNE_GB",
    // Remote mainchain backend for the sidechain
    MainchainRemoteHost    => "ELEMENTS_MAINCHAIN_REMOTE_HOST",
    MainchainRemotePort    => "ELEMENTS_MAINCHAIN_REMOTE_PORT",
    MainchainRemoteUser    => "ELEMENTS_MAINCHAIN_REMOTE_USER",
    MainchainRemotePass    => "ELEMENTS_MAINCHAIN_REMOTE_PASSWORD",
    // Credentials of the local bitcoind for the sidechain
    BitcoinRpcUser         => "BITCOIN_RPC_USER",
    BitcoinRpcPass         => "BITCOIN_RPC_PASSWORD",
}

/// Values containing this marker were never filled in by the installer
pub const PLACEHOLDER_MARKER: &str = "CHANGE_ME";

const APP_SUBDIR: &str = "nodeplane";

/// True for empty values and unfilled installer templates
pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.contains(PLACEHOLDER_MARKER)
}

/// Read a variable, treating empty and placeholder values as unset
pub fn env_opt(var: EnvVar) -> Option<String> {
    let val = std::env::var(var.as_str())
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !is_placeholder(v));
    tracing::trace!(var = var.as_str(), value = ?val.as_ref().map(|_| "<set>"), "env lookup");
    val
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn env_bool(var: EnvVar) -> Option<bool> {
    env_opt(var).map(|v| is_truthy(&v))
}

/// Default config file ($NODEPLANE_CONFIG or ~/.config/nodeplane/config.toml)
pub fn config_path() -> PathBuf {
    let path = env_opt(EnvVar::NodeplaneConfig)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("/etc"))
                .join(APP_SUBDIR)
                .join("config.toml")
        });
    tracing::trace!(path = %path.display(), "Resolved config path");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("   "));
        assert!(is_placeholder("postgres://CHANGE_ME@localhost/db"));
        assert!(!is_placeholder("s3cret"));
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("Yes"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
    }

    #[test]
    fn test_env_var_names() {
        assert_eq!(EnvVar::NodeplanePort.as_str(), "NODEPLANE_PORT");
        assert_eq!(
            EnvVar::MainchainRemoteHost.as_str(),
            "ELEMENTS_MAINCHAIN_REMOTE_HOST"
        );
    }
}
