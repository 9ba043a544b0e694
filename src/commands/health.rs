use anyhow::anyhow;
use console::style;
use nodeplane::daemon::protocol::{DaemonKind, DaemonSnapshot, HealthLevel};

use super::{print_warning, Node};

fn level_label(level: HealthLevel) -> String {
    match level {
        HealthLevel::Ok => style("OK").green().bold().to_string(),
        HealthLevel::Warn => style("WARN").yellow().bold().to_string(),
        HealthLevel::Err => style("ERR").red().bold().to_string(),
    }
}

pub(crate) async fn cmd_health(node: &Node, json: bool) -> anyhow::Result<()> {
    let verdict = node.health.verdict(node.state().self_checks().await).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }

    println!("{} {}", style("Node health:").bold(), level_label(verdict.overall));
    for issue in &verdict.issues {
        println!(
            "  {:<18} {:<6} {}",
            issue.component.to_string(),
            level_label(issue.level),
            issue.message
        );
    }
    Ok(())
}

pub(crate) async fn cmd_status(node: &Node, kind: &str, json: bool) -> anyhow::Result<()> {
    let kind: DaemonKind = kind.parse().map_err(|e: String| anyhow!(e))?;

    let snapshot = match node.health.probe_one(kind).await {
        Ok(snapshot) => snapshot,
        Err(failure) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&failure)?);
            } else {
                print_warning(format!("{} probe failed: {}", kind.label(), failure.reason));
            }
            return Ok(());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(snap: &DaemonSnapshot) {
    println!("{} ({})", style(snap.kind.label()).bold(), snap.kind);
    row("installed", snap.installed);
    row("service", snap.service_state.as_str());
    row("rpc", if snap.rpc_ok { "ok" } else { "down" });
    if let Some(err) = &snap.rpc_error {
        row("rpc error", style(err).red());
    }
    if let Some(chain) = &snap.chain_name {
        row("chain", chain);
    }
    match (snap.block_height, snap.header_height) {
        (Some(blocks), Some(headers)) => row("blocks", format!("{blocks} / {headers}")),
        (Some(blocks), None) => row("blocks", blocks),
        _ => {}
    }
    if let Some(progress) = snap.verification_progress {
        row("progress", format!("{:.2}%", progress.clamp(0.0, 1.0) * 100.0));
    }
    if let Some(ibd) = snap.in_initial_block_download {
        row("syncing", ibd);
    }
    if let Some(peers) = snap.peer_count {
        row("peers", peers);
    }
    if let Some(version) = &snap.version_string {
        row("version", version);
    }
    if let Some(bytes) = snap.disk_bytes_used {
        row("disk", format!("{:.1} GB", bytes as f64 / 1e9));
    }
    if let Some(linkage) = &snap.mainchain {
        row(
            "mainchain",
            format!(
                "{} {}:{} (local ready: {})",
                linkage.source, linkage.rpc_host, linkage.rpc_port, linkage.local_ready
            ),
        );
    }
}

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<12} {}", style(label).dim(), value);
}
