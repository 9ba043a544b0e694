//! Daily routing reports.
//!
//! A periodic job collects one day's Lightning routing numbers and hands
//! them to [`ReportsFeed::record_day`], which only stores them while the
//! node is healthy enough for the numbers to mean anything.

mod store;

pub use store::ReportsStore;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::daemon::protocol::{
    Component, DaemonKind, DaemonSnapshot, HealthLevel, HealthVerdict, ProbeOutcome,
};
use crate::daemon::HealthManager;
use crate::error::ReportsError;

/// Additive daily counters plus optional point-in-time balances.
/// Amounts come in whole sats and millisats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub forward_fee_revenue_sat: i64,
    pub forward_fee_revenue_msat: i64,
    pub rebalance_fee_cost_sat: i64,
    pub rebalance_fee_cost_msat: i64,
    pub net_routing_profit_sat: i64,
    pub net_routing_profit_msat: i64,
    pub forward_count: i64,
    pub rebalance_count: i64,
    pub routed_volume_sat: i64,
    pub routed_volume_msat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain_balance_sat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lightning_balance_sat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_balance_sat: Option<i64>,
}

impl Metrics {
    /// Older rows only carry sats; derive millisats where they are missing
    pub fn fill_msat_from_sat(&mut self) {
        fill(&mut self.forward_fee_revenue_msat, self.forward_fee_revenue_sat);
        fill(&mut self.rebalance_fee_cost_msat, self.rebalance_fee_cost_sat);
        fill(&mut self.net_routing_profit_msat, self.net_routing_profit_sat);
        fill(&mut self.routed_volume_msat, self.routed_volume_sat);
    }

    /// Per-day averages with integer division. Balances are not averaged.
    fn averaged(&self, days: i64) -> Self {
        if days <= 0 {
            return Self::default();
        }
        Self {
            forward_fee_revenue_sat: self.forward_fee_revenue_sat / days,
            forward_fee_revenue_msat: self.forward_fee_revenue_msat / days,
            rebalance_fee_cost_sat: self.rebalance_fee_cost_sat / days,
            rebalance_fee_cost_msat: self.rebalance_fee_cost_msat / days,
            net_routing_profit_sat: self.net_routing_profit_sat / days,
            net_routing_profit_msat: self.net_routing_profit_msat / days,
            forward_count: self.forward_count / days,
            rebalance_count: self.rebalance_count / days,
            routed_volume_sat: self.routed_volume_sat / days,
            routed_volume_msat: self.routed_volume_msat / days,
            ..Self::default()
        }
    }
}

fn fill(msat: &mut i64, sat: i64) {
    if *msat == 0 && sat != 0 {
        *msat = sat.saturating_mul(1000);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub report_date: NaiveDate,
    #[serde(flatten)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub days: i64,
    pub totals: Metrics,
    pub averages: Metrics,
}

impl Summary {
    fn new(days: i64, mut totals: Metrics) -> Self {
        totals.fill_msat_from_sat();
        let averages = totals.averaged(days);
        Self {
            days,
            totals,
            averages,
        }
    }
}

/// Parse a `YYYY-MM-DD` report date
pub fn parse_date(value: &str) -> Result<NaiveDate, ReportsError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ReportsError::InvalidDate(value.to_string()))
}

/// The UTC calendar day a timestamp belongs to
pub fn report_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// Why routing numbers taken right now would be unreliable, if they would be
pub fn sampling_blocker(verdict: &HealthVerdict, lightning: &DaemonSnapshot) -> Option<String> {
    let lnd = Component::Daemon(DaemonKind::Lightning);
    if let Some(issue) = verdict.issue_for(&lnd) {
        if issue.level == HealthLevel::Err {
            return Some(issue.message.clone());
        }
    }
    if !lightning.installed {
        return Some("lnd is not installed".to_string());
    }
    if !lightning.service_state.is_running() {
        return Some(format!("lnd is {}", lightning.service_state.as_str()));
    }
    if !lightning.rpc_ok {
        return Some("lnd RPC is unreachable".to_string());
    }
    if lightning.in_initial_block_download != Some(false) {
        return Some("lnd is not synced to chain".to_string());
    }
    None
}

pub fn safe_to_sample(verdict: &HealthVerdict, lightning: &DaemonSnapshot) -> bool {
    sampling_blocker(verdict, lightning).is_none()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded { report_date: NaiveDate },
    Skipped { reason: String },
}

/// Gate between the metrics job and the store
pub struct ReportsFeed {
    store: Arc<ReportsStore>,
}

impl ReportsFeed {
    pub fn new(store: Arc<ReportsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ReportsStore {
        &self.store
    }

    /// Store one day's metrics if the node was fit to sample
    pub fn record_day(
        &self,
        date: NaiveDate,
        metrics: Metrics,
        verdict: &HealthVerdict,
        lightning: &ProbeOutcome,
    ) -> Result<RecordOutcome, ReportsError> {
        let blocker = match lightning {
            Ok(snap) => sampling_blocker(verdict, snap),
            Err(failure) => Some(format!("lnd probe failed: {}", failure.reason)),
        };
        if let Some(reason) = blocker {
            warn!(date = %date, "Skipping daily report: {}", reason);
            return Ok(RecordOutcome::Skipped { reason });
        }

        self.store.upsert(&Row {
            report_date: date,
            metrics,
        })?;
        info!(date = %date, "Recorded daily report");
        Ok(RecordOutcome::Recorded { report_date: date })
    }

    /// Take a fresh health reading, then record
    pub async fn sample_and_record(
        &self,
        health: &HealthManager,
        date: NaiveDate,
        metrics: Metrics,
    ) -> Result<RecordOutcome, ReportsError> {
        let outcomes = health.probe_all().await;
        let verdict = crate::daemon::health::aggregate(&outcomes, &[]);
        // probe_all answers in DaemonKind order
        let lightning = outcomes
            .into_iter()
            .nth(2)
            .unwrap_or_else(|| Ok(DaemonSnapshot::not_installed(DaemonKind::Lightning)));
        let feed = ReportsFeed::new(Arc::clone(&self.store));
        tokio::task::spawn_blocking(move || feed.record_day(date, metrics, &verdict, &lightning))
            .await?
    }
}
