// SPDX-License-Identifier: GPL-3.0-only

//! Host command execution with bounded wait and cancellation

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bridge_contracts::{CommandOutput, CommandRunner, CommandSpec, GatewayError};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Runs commands with `tokio::process`, killing the child on timeout or cancel
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    default_timeout: Duration,
}

impl TokioCommandRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GatewayError> {
        let rendered = spec.render();
        debug!("Running {}", rendered);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let child = command.spawn().map_err(|e| GatewayError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        let timeout = spec.timeout.unwrap_or(self.default_timeout);

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Cancelled while waiting for {}", spec.program);
                return Err(GatewayError::Cancelled);
            }
            waited = tokio::time::timeout(timeout, child.wait_with_output()) => match waited {
                Err(_) => {
                    warn!("{} timed out after {:?}", rendered, timeout);
                    return Err(GatewayError::ProcessTimeout {
                        program: spec.program.clone(),
                        after: timeout,
                    });
                }
                Ok(Err(e)) => {
                    return Err(GatewayError::Spawn {
                        program: spec.program.clone(),
                        reason: e.to_string(),
                    });
                }
                Ok(Ok(output)) => output,
            },
        };

        let result = CommandOutput {
            status: output.status.code(),
            stdout: decode_console_bytes(&output.stdout),
            stderr: decode_console_bytes(&output.stderr),
        };

        if !result.success() {
            debug!(
                "{} exited with {:?}: {}",
                spec.program,
                result.status,
                result.error_text()
            );
        }

        Ok(result)
    }
}

/// Decode console output that may be UTF-16LE (as `wsl.exe` emits) or UTF-8
pub fn decode_console_bytes(bytes: &[u8]) -> String {
    if looks_like_utf16le(bytes) {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units)
            .trim_start_matches('\u{feff}')
            .to_string();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn looks_like_utf16le(bytes: &[u8]) -> bool {
    if bytes.len() < 2 {
        return false;
    }
    if bytes.starts_with(&[0xff, 0xfe]) {
        return true;
    }
    let pairs = bytes.len() / 2;
    let odd_zeros = bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
    odd_zeros * 2 > pairs
}
