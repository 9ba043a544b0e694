pub(crate) mod health;
pub(crate) mod reports;
pub(crate) mod serve;
pub(crate) mod transition;

use anyhow::Context;
use console::style;
use nodeplane::daemon::{CommandExecutor, CommandRunner, DaemonProber, HealthManager, Orchestrator};
use nodeplane::http_server::AppState;
use nodeplane::reports::ReportsStore;
use nodeplane::ManagerConfig;
use std::sync::Arc;

/// Components wired up once from the loaded config
pub(crate) struct Node {
    pub config: Arc<ManagerConfig>,
    pub health: Arc<HealthManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub reports: Option<Arc<ReportsStore>>,
}

impl Node {
    pub fn new(config: ManagerConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let runner: Arc<dyn CommandRunner> =
            Arc::new(CommandExecutor::new(&config.service_manager));
        let prober = Arc::new(DaemonProber::new(runner, Arc::clone(&config)));

        let reports = match &config.reports.database {
            Some(path) => {
                let store = ReportsStore::open(path).with_context(|| {
                    format!("failed to open reports database {}", path.display())
                })?;
                Some(Arc::new(store))
            }
            None => None,
        };

        Ok(Self {
            health: Arc::new(HealthManager::new(Arc::clone(&prober))),
            orchestrator: Arc::new(Orchestrator::new(prober)),
            reports,
            config,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            health: Arc::clone(&self.health),
            orchestrator: Arc::clone(&self.orchestrator),
            reports: self.reports.clone(),
        }
    }
}

pub(crate) fn print_success(msg: impl std::fmt::Display) {
    println!("{} {}", style("✓").green(), msg);
}

pub(crate) fn print_step(msg: impl std::fmt::Display) {
    println!("{} {}", style("→").cyan(), msg);
}

pub(crate) fn print_warning(msg: impl std::fmt::Display) {
    println!("{} {}", style("!").yellow().bold(), msg);
}
