//! SQLite-backed daily routing reports.
//!
//! One row per UTC calendar day in `reports_daily`. Writes replace the whole
//! day, so re-running a day's job never double counts.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row as SqlRow};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{Metrics, Row, Summary};
use crate::error::ReportsError;

type Result<T> = std::result::Result<T, ReportsError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reports_daily (
    report_date TEXT PRIMARY KEY,
    forward_fee_revenue_sats INTEGER NOT NULL DEFAULT 0,
    forward_fee_revenue_msat INTEGER NOT NULL DEFAULT 0,
    rebalance_fee_cost_sats INTEGER NOT NULL DEFAULT 0,
    rebalance_fee_cost_msat INTEGER NOT NULL DEFAULT 0,
    net_routing_profit_sats INTEGER NOT NULL DEFAULT 0,
    net_routing_profit_msat INTEGER NOT NULL DEFAULT 0,
    forward_count INTEGER NOT NULL DEFAULT 0,
    rebalance_count INTEGER NOT NULL DEFAULT 0,
    routed_volume_sats INTEGER NOT NULL DEFAULT 0,
    routed_volume_msat INTEGER NOT NULL DEFAULT 0,
    onchain_balance_sats INTEGER NULL,
    lightning_balance_sats INTEGER NULL,
    total_balance_sats INTEGER NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const COLUMNS: &str = "report_date,
    forward_fee_revenue_sats, forward_fee_revenue_msat,
    rebalance_fee_cost_sats, rebalance_fee_cost_msat,
    net_routing_profit_sats, net_routing_profit_msat,
    forward_count, rebalance_count,
    routed_volume_sats, routed_volume_msat,
    onchain_balance_sats, lightning_balance_sats, total_balance_sats";

const SUMS: &str = "count(*),
    coalesce(sum(forward_fee_revenue_sats), 0), coalesce(sum(forward_fee_revenue_msat), 0),
    coalesce(sum(rebalance_fee_cost_sats), 0), coalesce(sum(rebalance_fee_cost_msat), 0),
    coalesce(sum(net_routing_profit_sats), 0), coalesce(sum(net_routing_profit_msat), 0),
    coalesce(sum(forward_count), 0), coalesce(sum(rebalance_count), 0),
    coalesce(sum(routed_volume_sats), 0), coalesce(sum(routed_volume_msat), 0)";

pub struct ReportsStore {
    conn: Mutex<Connection>,
}

impl ReportsStore {
    /// Open or create the database and make sure the table exists
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic mid-query leaves the connection itself usable
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run store calls on the blocking pool. Every query holds the
    /// connection lock and does synchronous I/O.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ReportsStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Cheap liveness query for health self-checks
    pub fn ping(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    /// Write all counters for the row's day, replacing what was there
    pub fn upsert(&self, row: &Row) -> Result<()> {
        let m = &row.metrics;
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO reports_daily (
                report_date,
                forward_fee_revenue_sats, forward_fee_revenue_msat,
                rebalance_fee_cost_sats, rebalance_fee_cost_msat,
                net_routing_profit_sats, net_routing_profit_msat,
                forward_count, rebalance_count,
                routed_volume_sats, routed_volume_msat,
                onchain_balance_sats, lightning_balance_sats, total_balance_sats,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            ON CONFLICT(report_date) DO UPDATE SET
                forward_fee_revenue_sats = excluded.forward_fee_revenue_sats,
                forward_fee_revenue_msat = excluded.forward_fee_revenue_msat,
                rebalance_fee_cost_sats = excluded.rebalance_fee_cost_sats,
                rebalance_fee_cost_msat = excluded.rebalance_fee_cost_msat,
                net_routing_profit_sats = excluded.net_routing_profit_sats,
                net_routing_profit_msat = excluded.net_routing_profit_msat,
                forward_count = excluded.forward_count,
                rebalance_count = excluded.rebalance_count,
                routed_volume_sats = excluded.routed_volume_sats,
                routed_volume_msat = excluded.routed_volume_msat,
                onchain_balance_sats = excluded.onchain_balance_sats,
                lightning_balance_sats = excluded.lightning_balance_sats,
                total_balance_sats = excluded.total_balance_sats,
                updated_at = excluded.updated_at",
            params![
                row.report_date,
                m.forward_fee_revenue_sat,
                m.forward_fee_revenue_msat,
                m.rebalance_fee_cost_sat,
                m.rebalance_fee_cost_msat,
                m.net_routing_profit_sat,
                m.net_routing_profit_msat,
                m.forward_count,
                m.rebalance_count,
                m.routed_volume_sat,
                m.routed_volume_msat,
                m.onchain_balance_sat,
                m.lightning_balance_sat,
                m.total_balance_sat,
                now,
            ],
        )?;
        debug!(date = %row.report_date, "Upserted daily report");
        Ok(())
    }

    pub fn get(&self, date: NaiveDate) -> Result<Option<Row>> {
        let sql = format!("SELECT {COLUMNS} FROM reports_daily WHERE report_date = ?1");
        let row = self.conn().query_row(&sql, params![date], read_row).optional()?;
        Ok(row)
    }

    /// Rows for `start..=end`, oldest first
    pub fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM reports_daily
             WHERE report_date >= ?1 AND report_date <= ?2
             ORDER BY report_date ASC"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![start, end], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn fetch_all(&self) -> Result<Vec<Row>> {
        let sql = format!("SELECT {COLUMNS} FROM reports_daily ORDER BY report_date ASC");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn summary_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Summary> {
        let sql = format!(
            "SELECT {SUMS} FROM reports_daily WHERE report_date >= ?1 AND report_date <= ?2"
        );
        let (days, totals) = self.conn().query_row(&sql, params![start, end], read_sums)?;
        Ok(Summary::new(days, totals))
    }

    pub fn summary_all(&self) -> Result<Summary> {
        let sql = format!("SELECT {SUMS} FROM reports_daily");
        let (days, totals) = self.conn().query_row(&sql, [], read_sums)?;
        Ok(Summary::new(days, totals))
    }
}

fn read_row(r: &SqlRow<'_>) -> rusqlite::Result<Row> {
    let mut metrics = Metrics {
        forward_fee_revenue_sat: r.get(1)?,
        forward_fee_revenue_msat: r.get(2)?,
        rebalance_fee_cost_sat: r.get(3)?,
        rebalance_fee_cost_msat: r.get(4)?,
        net_routing_profit_sat: r.get(5)?,
        net_routing_profit_msat: r.get(6)?,
        forward_count: r.get(7)?,
        rebalance_count: r.get(8)?,
        routed_volume_sat: r.get(9)?,
        routed_volume_msat: r.get(10)?,
        onchain_balance_sat: r.get(11)?,
        lightning_balance_sat: r.get(12)?,
        total_balance_sat: r.get(13)?,
    };
    metrics.fill_msat_from_sat();
    Ok(Row {
        report_date: r.get(0)?,
        metrics,
    })
}

fn read_sums(r: &SqlRow<'_>) -> rusqlite::Result<(i64, Metrics)> {
    let totals = Metrics {
        forward_fee_revenue_sat: r.get(1)?,
        forward_fee_revenue_msat: r.get(2)?,
        rebalance_fee_cost_sat: r.get(3)?,
        rebalance_fee_cost_msat: r.get(4)?,
        net_routing_profit_sat: r.get(5)?,
        net_routing_profit_msat: r.get(6)?,
        forward_count: r.get(7)?,
        rebalance_count: r.get(8)?,
        routed_volume_sat: r.get(9)?,
        routed_volume_msat: r.get(10)?,
        ..Metrics::default()
    };
    Ok((r.get(0)?, totals))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample(date: &str, fee_sat: i64, forwards: i64) -> Row {
        Row {
            report_date: day(date),
            metrics: Metrics {
                forward_fee_revenue_sat: fee_sat,
                forward_count: forwards,
                routed_volume_sat: 1_000_000,
                routed_volume_msat: 1_000_000_000,
                lightning_balance_sat: Some(5_000_000),
                ..Metrics::default()
            },
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = ReportsStore::open_in_memory().unwrap();
        let row = sample("2026-03-01", 120, 7);

        store.upsert(&row).unwrap();
        store.upsert(&row).unwrap();

        let all = store.fetch_all().unwrap();
        assert_eq!(all.len(), 1);
        let summary = store.summary_all().unwrap();
        assert_eq!(summary.days, 1);
        assert_eq!(summary.totals.forward_fee_revenue_sat, 120);
        assert_eq!(summary.totals.forward_count, 7);
    }

    #[test]
    fn test_upsert_replaces_counters() {
        let store = ReportsStore::open_in_memory().unwrap();
        store.upsert(&sample("2026-03-01", 120, 7)).unwrap();
        store.upsert(&sample("2026-03-01", 300, 9)).unwrap();

        let row = store.get(day("2026-03-01")).unwrap().unwrap();
        assert_eq!(row.metrics.forward_fee_revenue_sat, 300);
        assert_eq!(row.metrics.forward_count, 9);
        assert_eq!(row.metrics.lightning_balance_sat, Some(5_000_000));
        assert_eq!(row.metrics.onchain_balance_sat, None);
    }

    #[test]
    fn test_reads_fill_msat_from_sat() {
        let store = ReportsStore::open_in_memory().unwrap();
        store.upsert(&sample("2026-03-01", 120, 7)).unwrap();

        let row = store.get(day("2026-03-01")).unwrap().unwrap();
        assert_eq!(row.metrics.forward_fee_revenue_msat, 120_000);
        assert_eq!(row.metrics.routed_volume_msat, 1_000_000_000);
        assert_eq!(row.metrics.rebalance_fee_cost_msat, 0);
    }

    #[test]
    fn test_range_is_inclusive_and_ordered() {
        let store = ReportsStore::open_in_memory().unwrap();
        for date in ["2026-03-03", "2026-03-01", "2026-03-02", "2026-03-05"] {
            store.upsert(&sample(date, 10, 1)).unwrap();
        }

        let rows = store.fetch_range(day("2026-03-01"), day("2026-03-03")).unwrap();
        let dates: Vec<String> = rows.iter().map(|r| r.report_date.to_string()).collect();
        assert_eq!(dates, vec!["2026-03-01", "2026-03-02", "2026-03-03"]);
    }

    #[test]
    fn test_summary_averages_use_day_count() {
        let store = ReportsStore::open_in_memory().unwrap();
        store.upsert(&sample("2026-03-01", 100, 3)).unwrap();
        store.upsert(&sample("2026-03-02", 51, 4)).unwrap();

        let summary = store
            .summary_range(day("2026-03-01"), day("2026-03-31"))
            .unwrap();
        assert_eq!(summary.days, 2);
        assert_eq!(summary.totals.forward_fee_revenue_sat, 151);
        assert_eq!(summary.averages.forward_fee_revenue_sat, 75);
        assert_eq!(summary.averages.forward_count, 3);
    }

    #[test]
    fn test_empty_summary_has_zero_averages() {
        let store = ReportsStore::open_in_memory().unwrap();
        store.upsert(&sample("2026-01-01", 100, 3)).unwrap();

        let summary = store
            .summary_range(day("2026-03-01"), day("2026-03-31"))
            .unwrap();
        assert_eq!(summary.days, 0);
        assert_eq!(summary.totals, Metrics::default());
        assert_eq!(summary.averages, Metrics::default());
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_async_worker() {
        let store = Arc::new(ReportsStore::open_in_memory().unwrap());
        let caller = std::thread::current().id();

        let ran_on = store
            .blocking(|s| {
                s.upsert(&sample("2026-03-01", 120, 7))?;
                Ok(std::thread::current().id())
            })
            .await
            .unwrap();

        assert_ne!(ran_on, caller);
        let rows = store.blocking(|s| s.fetch_all()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("reports.db");
        let store = ReportsStore::open(&path).unwrap();
        store.ping().unwrap();
        assert!(path.exists());
    }
}
