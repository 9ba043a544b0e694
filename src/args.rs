use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nodeplane")]
#[command(version)]
#[command(about = "Control plane for a self-hosted bitcoind / elementsd / lnd node", long_about = None)]
pub(crate) struct Cli {
    /// Config file (defaults to NODEPLANE_CONFIG or ~/.config/nodeplane/config.toml)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the HTTP control plane
    Serve {
        /// Address to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default: 8420)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe every daemon and print the aggregated health verdict
    Health {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Probe one daemon
    Status {
        /// base-chain, side-chain or lightning (daemon names work too)
        kind: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Point the sidechain at a remote or the local base-chain backend
    Mainchain {
        /// remote or local
        source: String,
    },

    /// Switch base-chain storage between full and pruned
    Storage {
        /// full or pruned (omit to show the current setting)
        mode: Option<String>,

        /// Prune target in GB
        #[arg(long)]
        size_gb: Option<f64>,

        /// Restart bitcoind right away instead of on its next restart
        #[arg(long)]
        apply_now: bool,
    },

    /// Restart a daemon without changing its config
    Restart {
        kind: String,
    },

    /// Query or write daily routing reports
    Reports {
        #[command(subcommand)]
        command: ReportsCommands,
    },
}

#[derive(Subcommand)]
pub(crate) enum ReportsCommands {
    /// Totals and per-day averages
    Summary {
        /// First day, YYYY-MM-DD
        #[arg(long, requires = "end")]
        start: Option<String>,

        /// Last day, YYYY-MM-DD
        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Rows between two days, inclusive
    Range {
        start: String,
        end: String,
    },

    /// Every stored row
    All,

    /// Record one day's metrics if lnd is fit to sample
    Upsert {
        /// Day to record, YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        date: Option<String>,

        /// Metrics as a JSON object
        metrics: String,

        /// Skip the health gate
        #[arg(long)]
        force: bool,
    },
}
