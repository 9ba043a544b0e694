use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::probe::DaemonProber;
use super::protocol::{
    Component, DaemonKind, DaemonSnapshot, HealthLevel, HealthVerdict, Issue, MainchainSource,
    ProbeFailure, ProbeOutcome, ServiceState, TIP_TOLERANCE,
};

/// Extra wait on top of a probe's own budget before it is abandoned
const PROBE_SLACK: Duration = Duration::from_secs(1);

/// Name of the check that compares the sidechain's backend with the base chain
pub const LINKAGE_CHECK: &str = "mainchain-linkage";

/// Outcome of a non-daemon check (self-checks, cross-daemon consistency)
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Pass,
    Warn(String),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: String,
    pub outcome: CheckOutcome,
}

impl Check {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: CheckOutcome::Pass,
        }
    }

    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: CheckOutcome::Warn(message.into()),
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: CheckOutcome::Fail(message.into()),
        }
    }
}

/// Fold probe outcomes and checks into one verdict.
///
/// Worst level wins. Each component contributes at most one issue: daemons
/// in `DaemonKind` order first, then checks in the order given. Daemons
/// with no outcome in `outcomes` contribute nothing.
pub fn aggregate(outcomes: &[ProbeOutcome], checks: &[Check]) -> HealthVerdict {
    let mut issues = Vec::new();

    for kind in DaemonKind::ALL {
        let outcome = outcomes.iter().find(|o| outcome_kind(o) == kind);
        if let Some(issue) = outcome.and_then(assess_outcome) {
            issues.push(issue);
        }
    }

    for check in checks {
        let (level, message) = match &check.outcome {
            CheckOutcome::Pass => continue,
            CheckOutcome::Warn(msg) => (HealthLevel::Warn, msg.clone()),
            CheckOutcome::Fail(msg) => (HealthLevel::Err, msg.clone()),
        };
        issues.push(Issue {
            component: Component::Check(check.name.clone()),
            level,
            message,
        });
    }

    let overall = issues
        .iter()
        .map(|i| i.level)
        .max()
        .unwrap_or(HealthLevel::Ok);
    HealthVerdict { overall, issues }
}

fn outcome_kind(outcome: &ProbeOutcome) -> DaemonKind {
    match outcome {
        Ok(snap) => snap.kind,
        Err(failure) => failure.kind,
    }
}

fn assess_outcome(outcome: &ProbeOutcome) -> Option<Issue> {
    match outcome {
        Ok(snap) => assess_snapshot(snap),
        Err(failure) => Some(assess_failure(failure)),
    }
}

fn assess_failure(failure: &ProbeFailure) -> Issue {
    let label = failure.kind.label();
    // an installed daemon we could not look at is a hard failure
    let (level, message) = if failure.installed {
        (HealthLevel::Err, format!("{label} probe failed: {}", failure.reason))
    } else {
        (
            HealthLevel::Warn,
            format!("{label} probe failed before install state was known: {}", failure.reason),
        )
    };
    Issue {
        component: Component::Daemon(failure.kind),
        level,
        message,
    }
}

fn assess_snapshot(snap: &DaemonSnapshot) -> Option<Issue> {
    let label = snap.kind.label();
    let message = if !snap.installed {
        format!("{label} is not installed")
    } else {
        match snap.service_state {
            ServiceState::Running => running_anomaly(snap)?,
            ServiceState::Stopped => format!("{label} is installed but stopped"),
            ServiceState::NotInstalled => format!("{label} has no service unit"),
            ServiceState::Unknown => format!("{label} service state could not be determined"),
        }
    };
    Some(Issue {
        component: Component::Daemon(snap.kind),
        level: HealthLevel::Warn,
        message,
    })
}

/// Soft problems of a running daemon, if any
fn running_anomaly(snap: &DaemonSnapshot) -> Option<String> {
    let label = snap.kind.label();
    if !snap.rpc_ok {
        let detail = snap.rpc_error.as_deref().unwrap_or("no response");
        return Some(format!("{label} is running but RPC is unreachable: {detail}"));
    }
    if snap.in_initial_block_download == Some(true) {
        return Some(match (snap.kind, snap.verification_progress) {
            (DaemonKind::Lightning, _) => format!("{label} is not synced to chain"),
            (_, Some(progress)) => format!(
                "{label} is in initial block download ({:.2}%)",
                progress * 100.0
            ),
            (_, None) => format!("{label} is in initial block download"),
        });
    }
    match (snap.block_height, snap.header_height, snap.blocks_behind()) {
        (Some(blocks), Some(headers), Some(behind)) if behind > TIP_TOLERANCE => Some(format!(
            "{label} is syncing: {blocks} of {headers} blocks"
        )),
        _ => None,
    }
}

/// Compare the sidechain's configured backend with the base chain's state
pub fn linkage_check(sidechain: &ProbeOutcome) -> Check {
    let linkage = match sidechain {
        Ok(snap) => snap.mainchain.as_ref(),
        Err(_) => None,
    };
    match linkage {
        Some(l) if l.source == MainchainSource::Local && !l.local_ready => Check::warn(
            LINKAGE_CHECK,
            "elementsd trusts the local bitcoind, which is not fully synced",
        ),
        _ => Check::pass(LINKAGE_CHECK),
    }
}

/// Gathers probe outcomes for all daemons and folds them into a verdict.
/// Holds no state between calls.
pub struct HealthManager {
    prober: Arc<DaemonProber>,
}

impl HealthManager {
    pub fn new(prober: Arc<DaemonProber>) -> Self {
        Self { prober }
    }

    /// Probe one daemon under its own bound. A probe that overruns is
    /// abandoned and reported as a failure.
    pub async fn probe_bounded(&self, kind: DaemonKind) -> ProbeOutcome {
        let budget = self.prober.config().probe.budget();
        let limit = budget + PROBE_SLACK;
        match tokio::time::timeout(limit, self.prober.probe_within(kind, budget)).await {
            Ok(snap) => Ok(snap),
            Err(_) => {
                let binary = &self.prober.config().layout(kind).binary;
                let installed = tokio::fs::try_exists(binary).await.unwrap_or(false);
                warn!(kind = %kind, "Probe abandoned after {:?}", limit);
                Err(ProbeFailure {
                    kind,
                    installed,
                    reason: format!("no answer within {limit:?}"),
                })
            }
        }
    }

    /// All three probes, run concurrently, with the sidechain's
    /// `local_ready` filled from the base-chain result of the same poll.
    pub async fn probe_all(&self) -> Vec<ProbeOutcome> {
        let (base, side, lightning) = tokio::join!(
            self.probe_bounded(DaemonKind::BaseChain),
            self.probe_bounded(DaemonKind::SideChain),
            self.probe_bounded(DaemonKind::Lightning),
        );
        let side = fill_local_ready(side, &base);
        vec![base, side, lightning]
    }

    /// One daemon's snapshot. The sidechain needs a base-chain probe
    /// alongside it to know whether the local backend is usable.
    pub async fn probe_one(&self, kind: DaemonKind) -> ProbeOutcome {
        if kind != DaemonKind::SideChain {
            return self.probe_bounded(kind).await;
        }
        let (base, side) = tokio::join!(
            self.probe_bounded(DaemonKind::BaseChain),
            self.probe_bounded(DaemonKind::SideChain),
        );
        fill_local_ready(side, &base)
    }

    /// Fresh verdict over all daemons plus any caller-supplied checks
    pub async fn verdict(&self, extra: Vec<Check>) -> HealthVerdict {
        let outcomes = self.probe_all().await;
        let mut checks = vec![linkage_check(&outcomes[1])];
        checks.extend(extra);

        let verdict = aggregate(&outcomes, &checks);
        debug!(
            overall = ?verdict.overall,
            issues = verdict.issues.len(),
            "Health aggregated"
        );
        verdict
    }
}

fn fill_local_ready(side: ProbeOutcome, base: &ProbeOutcome) -> ProbeOutcome {
    side.map(|mut snap| {
        if let Some(linkage) = snap.mainchain.take() {
            snap.mainchain = Some(match base {
                Ok(base) => linkage.with_local_ready(base),
                Err(_) => linkage,
            });
        }
        snap
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::executor::CommandRunner;
    use crate::daemon::protocol::MainchainLinkage;
    use crate::daemon::testing::{install, layout_config, script_running, Reply, ScriptedRunner};

    fn running(kind: DaemonKind) -> DaemonSnapshot {
        DaemonSnapshot {
            installed: true,
            service_state: ServiceState::Running,
            rpc_ok: true,
            block_height: Some(850_000),
            header_height: Some(850_000),
            in_initial_block_download: Some(false),
            ..DaemonSnapshot::new(kind)
        }
    }

    fn all_running() -> Vec<ProbeOutcome> {
        DaemonKind::ALL.iter().map(|k| Ok(running(*k))).collect()
    }

    #[test]
    fn test_all_healthy_is_ok_without_issues() {
        let verdict = aggregate(&all_running(), &[Check::pass("reports-db")]);
        assert_eq!(verdict.overall, HealthLevel::Ok);
        assert!(verdict.issues.is_empty());
    }

    #[test]
    fn test_missing_base_chain_is_single_warning() {
        let mut outcomes = all_running();
        outcomes[0] = Ok(DaemonSnapshot::not_installed(DaemonKind::BaseChain));

        let verdict = aggregate(&outcomes, &[]);

        assert_eq!(verdict.overall, HealthLevel::Warn);
        assert_eq!(verdict.issues.len(), 1);
        let issue = verdict
            .issue_for(&Component::Daemon(DaemonKind::BaseChain))
            .unwrap();
        assert_eq!(issue.level, HealthLevel::Warn);
    }

    #[test]
    fn test_probe_failure_on_installed_daemon_is_error() {
        let mut outcomes = all_running();
        outcomes[2] = Err(ProbeFailure {
            kind: DaemonKind::Lightning,
            installed: true,
            reason: "no answer".into(),
        });
        outcomes[0] = Ok(DaemonSnapshot::not_installed(DaemonKind::BaseChain));

        let verdict = aggregate(&outcomes, &[]);

        assert_eq!(verdict.overall, HealthLevel::Err);
        // component order, not severity order
        assert_eq!(verdict.issues[0].component, Component::Daemon(DaemonKind::BaseChain));
        assert_eq!(verdict.issues[1].level, HealthLevel::Err);
    }

    #[test]
    fn test_soft_anomalies_warn() {
        let mut stopped = running(DaemonKind::BaseChain);
        stopped.service_state = ServiceState::Stopped;
        stopped.rpc_ok = false;

        let mut unreachable = running(DaemonKind::SideChain);
        unreachable.rpc_ok = false;
        unreachable.rpc_error = Some("rpc unreachable: connection refused".into());

        let mut ibd = running(DaemonKind::Lightning);
        ibd.in_initial_block_download = Some(true);

        let verdict = aggregate(&[Ok(stopped), Ok(unreachable), Ok(ibd)], &[]);

        assert_eq!(verdict.overall, HealthLevel::Warn);
        assert_eq!(verdict.issues.len(), 3);
        assert!(verdict.issues[1].message.contains("connection refused"));
        assert!(verdict.issues[2].message.contains("not synced"));
    }

    #[test]
    fn test_syncing_base_chain_warns() {
        let mut behind = running(DaemonKind::BaseChain);
        behind.block_height = Some(849_000);
        let verdict = aggregate(&[Ok(behind)], &[]);
        assert_eq!(verdict.overall, HealthLevel::Warn);
        assert!(verdict.issues[0].message.contains("849000 of 850000"));
    }

    #[test]
    fn test_header_one_ahead_of_tip_is_not_syncing() {
        let mut at_tip = running(DaemonKind::BaseChain);
        at_tip.header_height = Some(850_001);
        let verdict = aggregate(&[Ok(at_tip)], &[]);
        assert!(verdict.issue_for(&Component::Daemon(DaemonKind::BaseChain)).is_none());
    }

    #[test]
    fn test_failed_self_check_is_error() {
        let verdict = aggregate(
            &all_running(),
            &[Check::warn("a", "meh"), Check::fail("reports-db", "locked")],
        );
        assert_eq!(verdict.overall, HealthLevel::Err);
        assert_eq!(verdict.issues.len(), 2);
        assert_eq!(verdict.issues[1].component, Component::Check("reports-db".into()));
    }

    #[test]
    fn test_issues_imply_non_ok() {
        let cases: Vec<Vec<ProbeOutcome>> = vec![
            all_running(),
            vec![Ok(DaemonSnapshot::not_installed(DaemonKind::SideChain))],
            vec![Err(ProbeFailure {
                kind: DaemonKind::BaseChain,
                installed: false,
                reason: "x".into(),
            })],
            vec![],
        ];
        for outcomes in cases {
            let verdict = aggregate(&outcomes, &[]);
            assert_eq!(verdict.is_ok(), verdict.issues.is_empty());
        }
    }

    #[test]
    fn test_linkage_check_flags_unready_local_backend() {
        let mut side = running(DaemonKind::SideChain);
        side.mainchain = Some(MainchainLinkage {
            source: MainchainSource::Local,
            rpc_host: "127.0.0.1".into(),
            rpc_port: 8332,
            local_ready: false,
        });
        assert!(matches!(linkage_check(&Ok(side.clone())).outcome, CheckOutcome::Warn(_)));

        side.mainchain.as_mut().unwrap().local_ready = true;
        assert_eq!(linkage_check(&Ok(side)).outcome, CheckOutcome::Pass);
    }

    #[tokio::test]
    async fn test_verdict_fills_local_ready_from_same_poll() {
        let dir = tempfile::tempdir().unwrap();
        let config = layout_config(dir.path());
        install(&config, DaemonKind::BaseChain);
        install(&config, DaemonKind::SideChain);
        std::fs::write(
            &config.elementsd.config_file,
            "# nodeplane: mainchain_source=local\nmainchainrpchost=127.0.0.1\n",
        )
        .unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        script_running(&runner, &config, DaemonKind::BaseChain);
        script_running(&runner, &config, DaemonKind::SideChain);

        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        let prober = Arc::new(DaemonProber::new(dyn_runner, Arc::new(config)));
        let manager = HealthManager::new(prober);

        let side = manager.probe_one(DaemonKind::SideChain).await.unwrap();
        assert!(side.mainchain.unwrap().local_ready);

        let verdict = manager.verdict(vec![]).await;
        // only lnd, which is not installed
        assert_eq!(verdict.overall, HealthLevel::Warn);
        assert_eq!(verdict.issues.len(), 1);
        assert_eq!(verdict.issues[0].component, Component::Daemon(DaemonKind::Lightning));
    }

    #[tokio::test]
    async fn test_stuck_daemon_does_not_hold_up_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = layout_config(dir.path());
        config.probe.timeout_secs = 1;
        install(&config, DaemonKind::BaseChain);
        install(&config, DaemonKind::Lightning);

        let runner = Arc::new(ScriptedRunner::new());
        script_running(&runner, &config, DaemonKind::Lightning);
        runner.on(
            "is-active bitcoind",
            Reply::Delayed(Duration::from_secs(60), Box::new(Reply::ok("active"))),
        );

        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        let prober = Arc::new(DaemonProber::new(dyn_runner, Arc::new(config)));
        let manager = HealthManager::new(prober);

        let started = std::time::Instant::now();
        let outcomes = manager.probe_all().await;

        assert!(started.elapsed() < Duration::from_secs(5));
        let lightning = outcomes[2].as_ref().unwrap();
        assert!(lightning.rpc_ok);
        let base = outcomes[0].as_ref().unwrap();
        assert_eq!(base.service_state, ServiceState::Unknown);
    }
}
