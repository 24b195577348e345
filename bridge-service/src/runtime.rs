// SPDX-License-Identifier: GPL-3.0-only

//! Wiring of the real host collaborators

use std::sync::Arc;

use bridge_contracts::{CommandRunner, KernelLog, ScriptGateway};
use bridge_sys::{
    AccessStrategy, FailureClassifier, FsPathProbe, JsonMountStore, PowerShellDiskInventory,
    PowerShellGateway, ScheduledTaskRunner, TokioCommandRunner, WslKernelLog, elevation,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BridgeConfig;
use crate::orchestrator::{Collaborators, MountOrchestrator, OrchestratorSettings};
use crate::reconciler::Reconciler;

pub struct Bridge {
    pub orchestrator: MountOrchestrator,
    pub reconciler: Reconciler,
}

impl Bridge {
    pub async fn from_config(config: &BridgeConfig, cancel: &CancellationToken) -> Self {
        let shell = config.shell();
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new(
            config.gateway_config().process_timeout,
        ));
        let probe = Arc::new(FsPathProbe::default());
        let store = Arc::new(JsonMountStore::new(&config.state_file));

        let (gateway, kernel_log) = script_backends(config, runner.clone());

        let mut access = AccessStrategy::new(runner.clone(), probe.clone(), config.access_config());
        if running_elevated(runner.as_ref(), &shell, cancel).await {
            info!("Elevated process, mappings go through a user-context task");
            access = access.elevated(Arc::new(ScheduledTaskRunner::new(
                config.task_runner_config(),
                runner.clone(),
            )));
        }

        let orchestrator = MountOrchestrator::new(
            Collaborators {
                gateway,
                classifier: FailureClassifier::new(kernel_log, config.classifier.kernel_log_lines),
                access,
                probe: probe.clone(),
                inventory: Arc::new(PowerShellDiskInventory::new(runner.clone(), shell)),
                store: store.clone(),
            },
            OrchestratorSettings {
                allowed_filesystems: config.allowed_filesystems.clone(),
                default_distro: config.default_distro.clone(),
                reachability: config.reachability_policy(),
            },
        );
        let reconciler = Reconciler::new(store, probe, config.reconcile_probe_timeout());

        Self {
            orchestrator,
            reconciler,
        }
    }
}

fn real_backends(
    config: &BridgeConfig,
    runner: Arc<dyn CommandRunner>,
) -> (Arc<dyn ScriptGateway>, Arc<dyn KernelLog>) {
    (
        Arc::new(PowerShellGateway::new(config.gateway_config(), runner.clone())),
        Arc::new(WslKernelLog::new(runner)),
    )
}

#[cfg(not(feature = "test-hooks"))]
fn script_backends(
    config: &BridgeConfig,
    runner: Arc<dyn CommandRunner>,
) -> (Arc<dyn ScriptGateway>, Arc<dyn KernelLog>) {
    real_backends(config, runner)
}

#[cfg(feature = "test-hooks")]
fn script_backends(
    config: &BridgeConfig,
    runner: Arc<dyn CommandRunner>,
) -> (Arc<dyn ScriptGateway>, Arc<dyn KernelLog>) {
    use crate::hooks::{ScenarioGateway, ScenarioKernelLog, scenario_from_env};

    match scenario_from_env() {
        Some(scenario) => (
            Arc::new(ScenarioGateway::new(scenario)),
            Arc::new(ScenarioKernelLog::new(scenario)),
        ),
        None => real_backends(config, runner),
    }
}

#[cfg(not(feature = "test-hooks"))]
async fn running_elevated(runner: &dyn CommandRunner, shell: &str, cancel: &CancellationToken) -> bool {
    elevation::is_elevated(runner, shell, cancel).await
}

#[cfg(feature = "test-hooks")]
async fn running_elevated(runner: &dyn CommandRunner, shell: &str, cancel: &CancellationToken) -> bool {
    if crate::hooks::skip_elevation_check() {
        tracing::warn!("Elevation check skipped by {}", crate::hooks::SKIP_ELEVATION_VAR);
        return false;
    }
    elevation::is_elevated(runner, shell, cancel).await
}
