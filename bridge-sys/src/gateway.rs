// SPDX-License-Identifier: GPL-3.0-only

//! Script execution gateway
//!
//! Non-elevated scripts run as a child process whose output is captured
//! directly. Elevated scripts are launched through `Start-Process -Verb RunAs`,
//! which cannot redirect output across the privilege boundary, so the script
//! is told to also write its result to a randomly named file that the gateway
//! polls for, reads and deletes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_contracts::{
    CommandRunner, CommandSpec, GatewayError, RawOutput, ScriptGateway, ScriptInvocation,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::powershell;
use crate::retry::{PollError, RetryPolicy, poll_until};

/// Phrases PowerShell uses when the UAC prompt is dismissed
const ELEVATION_REFUSED: [&str; 3] = [
    "canceled by the user",
    "cancelled by the user",
    "requested operation requires elevation",
];

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory holding `mount.ps1`, `unmount.ps1`, ...
    pub script_dir: PathBuf,
    pub shell: String,
    /// Where elevated result files are exchanged
    pub exchange_dir: PathBuf,
    pub poll_interval: Duration,
    pub elevated_timeout: Duration,
    pub process_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
            shell: powershell::DEFAULT_SHELL.to_string(),
            exchange_dir: std::env::temp_dir(),
            poll_interval: Duration::from_millis(250),
            elevated_timeout: Duration::from_secs(120),
            process_timeout: Duration::from_secs(120),
        }
    }
}

/// Result file that is removed however the call ends
struct ResultFile {
    path: PathBuf,
}

impl ResultFile {
    fn allocate(dir: &Path) -> Result<Self, GatewayError> {
        let path = dir.join(format!("mount-bridge-{}.result", Uuid::new_v4()));
        // A file already sitting at a fresh random name was planted.
        if std::fs::symlink_metadata(&path).is_ok() {
            return Err(GatewayError::ResultIo {
                path,
                reason: "result path already exists".to_string(),
            });
        }
        Ok(Self { path })
    }
}

impl Drop for ResultFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed result file {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove result file {:?}: {}", self.path, e),
        }
    }
}

pub struct PowerShellGateway {
    config: GatewayConfig,
    runner: Arc<dyn CommandRunner>,
}

impl PowerShellGateway {
    pub fn new(config: GatewayConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn script_path(&self, invocation: &ScriptInvocation) -> Result<PathBuf, GatewayError> {
        let path = self
            .config
            .script_dir
            .join(invocation.operation.script_name());
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(GatewayError::ScriptMissing(path));
        }
        Ok(path)
    }

    async fn run_direct(
        &self,
        script: &Path,
        invocation: &ScriptInvocation,
        cancel: &CancellationToken,
    ) -> Result<RawOutput, GatewayError> {
        let spec = CommandSpec::new(&self.config.shell)
            .args(powershell::file_args(script, &invocation.rendered_args()))
            .timeout(self.config.process_timeout);

        let output = self.runner.run(&spec, cancel).await?;
        Ok(RawOutput {
            exit_code: output.status,
            text: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn run_elevated(
        &self,
        script: &Path,
        invocation: &ScriptInvocation,
        cancel: &CancellationToken,
    ) -> Result<RawOutput, GatewayError> {
        let result_file = ResultFile::allocate(&self.config.exchange_dir)?;

        let mut args = invocation.rendered_args();
        args.push("-ResultFile".to_string());
        args.push(result_file.path.display().to_string());

        let launch = format!(
            "Start-Process -FilePath {} -Verb RunAs -WindowStyle Hidden -ArgumentList {}",
            powershell::quote(&self.config.shell),
            powershell::quote_array(powershell::file_args(script, &args)),
        );
        let spec = powershell::command(&self.config.shell, &launch, self.config.process_timeout);

        info!(
            "Launching elevated {} (result file {:?})",
            invocation.operation, result_file.path
        );
        let launched = self.runner.run(&spec, cancel).await?;
        if !launched.success() {
            let text = launched.error_text().to_string();
            let lowered = text.to_lowercase();
            if ELEVATION_REFUSED.iter().any(|p| lowered.contains(p)) {
                return Err(GatewayError::ElevationDenied(text));
            }
            return Err(GatewayError::Spawn {
                program: self.config.shell.clone(),
                reason: text,
            });
        }

        let text = self.wait_for_result(&result_file.path, cancel).await?;
        Ok(RawOutput {
            exit_code: None,
            text,
            stderr: String::new(),
        })
    }

    async fn wait_for_result(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        let policy =
            RetryPolicy::from_timeout(self.config.elevated_timeout, self.config.poll_interval);

        // An empty file means the script is still writing.
        let polled = poll_until(policy, cancel, |_| async move {
            match tokio::fs::read_to_string(path).await {
                Ok(text) if !text.trim().is_empty() => Some(text),
                _ => None,
            }
        })
        .await;

        match polled {
            Ok(text) => {
                debug!("Collected {} bytes from {:?}", text.len(), path);
                Ok(text)
            }
            Err(PollError::Cancelled) => Err(GatewayError::Cancelled),
            Err(PollError::Exhausted { .. }) => {
                warn!("No result file at {:?} after {:?}", path, self.config.elevated_timeout);
                Err(GatewayError::ResultTimeout {
                    path: path.to_path_buf(),
                    after: self.config.elevated_timeout,
                })
            }
        }
    }
}

#[async_trait]
impl ScriptGateway for PowerShellGateway {
    async fn execute(
        &self,
        invocation: &ScriptInvocation,
        cancel: &CancellationToken,
    ) -> Result<RawOutput, GatewayError> {
        let script = self.script_path(invocation).await?;
        if invocation.elevated {
            self.run_elevated(&script, invocation, cancel).await
        } else {
            self.run_direct(&script, invocation, cancel).await
        }
    }
}
