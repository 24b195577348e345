// SPDX-License-Identifier: GPL-3.0-only

//! Kernel ring buffer access inside the subsystem

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_contracts::{
    BridgeError, BridgeErrorKind, CommandRunner, CommandSpec, GatewayError, KernelLog,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reads `dmesg` through `wsl.exe` as root
pub struct WslKernelLog {
    runner: Arc<dyn CommandRunner>,
    wsl_binary: String,
    timeout: Duration,
}

impl WslKernelLog {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            wsl_binary: "wsl.exe".to_string(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn spec(&self, distro: Option<&str>) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.wsl_binary);
        if let Some(distro) = distro {
            spec = spec.args(["-d", distro]);
        }
        spec.args(["-u", "root", "-e", "dmesg"]).timeout(self.timeout)
    }
}

/// Last `count` non-empty lines
pub fn tail_lines(text: &str, count: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

#[async_trait]
impl KernelLog for WslKernelLog {
    async fn tail(
        &self,
        distro: Option<&str>,
        lines: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, BridgeError> {
        let output = self
            .runner
            .run(&self.spec(distro), cancel)
            .await
            .map_err(|e| match e {
                GatewayError::ProcessTimeout { .. } => {
                    BridgeError::new(BridgeErrorKind::Timeout, e.to_string())
                }
                other => BridgeError::unavailable(other.to_string()),
            })?;

        if !output.success() {
            return Err(BridgeError::unavailable(format!(
                "dmesg failed: {}",
                output.error_text()
            )));
        }

        let tail = tail_lines(&output.stdout, lines);
        debug!("Read {} kernel log lines", tail.len());
        Ok(tail)
    }
}
