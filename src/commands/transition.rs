use anyhow::anyhow;
use nodeplane::daemon::orchestrator::{Accepted, RestartRequest};
use nodeplane::daemon::protocol::{DaemonKind, MainchainSource, StorageMode};
use nodeplane::error::{AppliedConfig, TransitionError};

use super::{print_step, print_success, print_warning, Node};

pub(crate) async fn cmd_mainchain(node: &Node, source: &str) -> anyhow::Result<()> {
    let target: MainchainSource = source.parse().map_err(|e: String| anyhow!(e))?;
    print_step(format!("Switching elementsd to the {target} mainchain backend"));

    let deadline = node.orchestrator.default_deadline();
    let result = node.orchestrator.switch_mainchain(target, deadline).await;
    report(result)
}

pub(crate) async fn cmd_storage(
    node: &Node,
    mode: Option<&str>,
    size_gb: Option<f64>,
    apply_now: bool,
) -> anyhow::Result<()> {
    let Some(mode) = mode else {
        let current = node.orchestrator.current_storage().await?;
        match (current.mode, current.prune_size_gb) {
            (StorageMode::Full, _) => println!("full"),
            (StorageMode::Pruned, Some(gb)) => println!("pruned ({gb} GB)"),
            (StorageMode::Pruned, None) => println!("pruned (manual)"),
        }
        return Ok(());
    };

    let mode: StorageMode = mode.parse().map_err(|e: String| anyhow!(e))?;
    print_step(format!("Switching bitcoind storage to {mode}"));

    let deadline = node.orchestrator.default_deadline();
    let result = node
        .orchestrator
        .switch_storage(mode, size_gb, apply_now, deadline)
        .await;
    report(result)
}

pub(crate) async fn cmd_restart(node: &Node, kind: &str) -> anyhow::Result<()> {
    let kind: DaemonKind = kind.parse().map_err(|e: String| anyhow!(e))?;
    let deadline = node.orchestrator.default_deadline();
    node.orchestrator.retry_restart(kind, deadline).await?;
    print_success(format!("Restart of {} requested", kind.label()));
    Ok(())
}

fn report(result: Result<Accepted, TransitionError>) -> anyhow::Result<()> {
    match result {
        Ok(accepted) => {
            print_success(describe(&accepted.applied));
            match accepted.restart {
                RestartRequest::Requested => {
                    print_step("Restart requested; watch `nodeplane health` for it to come back")
                }
                RestartRequest::Deferred => print_step("Takes effect on the next restart"),
            }
            Ok(())
        }
        Err(e) => {
            if let TransitionError::RestartFailed { applied, .. } = &e {
                print_warning(format!(
                    "Config was written; retry with `nodeplane restart {}`",
                    applied.daemon()
                ));
            }
            Err(e.into())
        }
    }
}

fn describe(applied: &AppliedConfig) -> String {
    match applied {
        AppliedConfig::Mainchain(linkage) => format!(
            "elementsd now uses the {} mainchain at {}:{}",
            linkage.source, linkage.rpc_host, linkage.rpc_port
        ),
        AppliedConfig::Storage(storage) => match (storage.mode, storage.prune_size_gb) {
            (StorageMode::Full, _) => "bitcoind set to full storage".to_string(),
            (StorageMode::Pruned, Some(gb)) => format!("bitcoind set to prune at {gb} GB"),
            (StorageMode::Pruned, None) => "bitcoind set to manual pruning".to_string(),
        },
    }
}
