use anyhow::{anyhow, Context};
use chrono::Utc;
use nodeplane::reports::{self, Metrics, RecordOutcome, ReportsFeed, ReportsStore, Row};
use std::sync::Arc;

use super::{print_success, print_warning, Node};
use crate::args::ReportsCommands;

pub(crate) async fn cmd_reports(node: &Node, command: ReportsCommands) -> anyhow::Result<()> {
    let store = node
        .reports
        .as_ref()
        .ok_or_else(|| anyhow!("no reports database configured (set reports.database or NODEPLANE_REPORTS_DB)"))?;

    match command {
        ReportsCommands::Summary { start, end } => {
            let summary = match (start, end) {
                (Some(start), Some(end)) => {
                    store.summary_range(reports::parse_date(&start)?, reports::parse_date(&end)?)?
                }
                _ => store.summary_all()?,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        ReportsCommands::Range { start, end } => {
            let rows = store.fetch_range(reports::parse_date(&start)?, reports::parse_date(&end)?)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        ReportsCommands::All => {
            println!("{}", serde_json::to_string_pretty(&store.fetch_all()?)?);
        }
        ReportsCommands::Upsert {
            date,
            metrics,
            force,
        } => upsert(node, store, date.as_deref(), &metrics, force).await?,
    }
    Ok(())
}

async fn upsert(
    node: &Node,
    store: &Arc<ReportsStore>,
    date: Option<&str>,
    metrics: &str,
    force: bool,
) -> anyhow::Result<()> {
    let metrics: Metrics = serde_json::from_str(metrics).context("metrics must be a JSON object")?;
    let date = match date {
        Some(d) => reports::parse_date(d)?,
        None => reports::report_day(Utc::now()),
    };

    if force {
        store.upsert(&Row {
            report_date: date,
            metrics,
        })?;
        print_success(format!("Recorded {date}"));
        return Ok(());
    }

    let feed = ReportsFeed::new(Arc::clone(store));
    match feed.sample_and_record(&node.health, date, metrics).await? {
        RecordOutcome::Recorded { report_date } => print_success(format!("Recorded {report_date}")),
        RecordOutcome::Skipped { reason } => print_warning(format!("Skipped {date}: {reason}")),
    }
    Ok(())
}
