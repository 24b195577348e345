// SPDX-License-Identifier: GPL-3.0-only

//! Hardware-in-loop hooks
//!
//! Only compiled with the `test-hooks` feature. `MOUNT_BRIDGE_TEST_SCENARIO`
//! replaces the script gateway and kernel log with canned replies;
//! `MOUNT_BRIDGE_SKIP_ELEVATION_CHECK` treats the process as unelevated so
//! mappings are made directly.

use async_trait::async_trait;
use bridge_contracts::{
    BridgeError, GatewayError, KernelLog, RawOutput, ScriptGateway, ScriptInvocation,
    ScriptOperation,
};
use bridge_sys::protocol::{self, FailureReport, Fields, ScriptReply};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const SCENARIO_VAR: &str = "MOUNT_BRIDGE_TEST_SCENARIO";
pub const SKIP_ELEVATION_VAR: &str = "MOUNT_BRIDGE_SKIP_ELEVATION_CHECK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Success,
    AlreadyMounted,
    /// Mount fails with `Invalid argument` and the kernel log names an
    /// unsupported filesystem feature
    Incompatible,
    Unsupported,
    ElevationDenied,
}

impl std::str::FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "success" => Ok(Self::Success),
            "already-mounted" => Ok(Self::AlreadyMounted),
            "incompatible" => Ok(Self::Incompatible),
            "unsupported" => Ok(Self::Unsupported),
            "elevation-denied" => Ok(Self::ElevationDenied),
            other => Err(format!("Unknown test scenario: {}", other)),
        }
    }
}

/// Scenario named in the environment, if any
pub fn scenario_from_env() -> Option<Scenario> {
    let value = std::env::var(SCENARIO_VAR).ok()?;
    match value.parse() {
        Ok(scenario) => {
            warn!("Test scenario {:?} active, no real mounts will happen", scenario);
            Some(scenario)
        }
        Err(e) => {
            warn!("Ignoring {}: {}", SCENARIO_VAR, e);
            None
        }
    }
}

pub fn skip_elevation_check() -> bool {
    std::env::var(SKIP_ELEVATION_VAR).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

fn argument<'a>(invocation: &'a ScriptInvocation, name: &str) -> Option<&'a str> {
    invocation
        .arguments
        .iter()
        .find(|arg| arg.name == name)
        .map(|arg| arg.value.as_str())
}

/// [`ScriptGateway`] answering from a fixed scenario
pub struct ScenarioGateway {
    scenario: Scenario,
}

impl ScenarioGateway {
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }

    fn mount_reply(&self, invocation: &ScriptInvocation) -> Result<ScriptReply, GatewayError> {
        let disk = argument(invocation, "DiskIndex").unwrap_or("0");
        let partition = argument(invocation, "Partition").unwrap_or("1");
        let distro = argument(invocation, "Distro").unwrap_or("Ubuntu");
        let linux_path = format!("/mnt/wsl/PHYSICALDRIVE{}p{}", disk, partition);
        let unc_path = format!(r"\\wsl$\{}{}", distro, linux_path.replace('/', "\\"));
        let paths = Fields::new()
            .with(protocol::KEY_DISTRO, distro)
            .with(protocol::KEY_LINUX_PATH, &linux_path)
            .with(protocol::KEY_UNC_PATH, &unc_path);

        let failure = |message: &str, fields: Fields| {
            ScriptReply::Failure(FailureReport {
                message: message.to_string(),
                fields,
            })
        };

        Ok(match self.scenario {
            Scenario::Success => ScriptReply::Success(paths),
            Scenario::AlreadyMounted => failure(
                "The disk is already mounted in the subsystem.",
                paths.with(protocol::KEY_ALREADY_MOUNTED, "true"),
            ),
            Scenario::Incompatible => failure(
                "Failed to mount the disk. Error: Invalid argument",
                Fields::new(),
            ),
            Scenario::Unsupported => failure(
                "Disk passthrough is not supported on this build.",
                Fields::new().with(protocol::KEY_ERROR_CODE, "UNSUPPORTED"),
            ),
            Scenario::ElevationDenied => {
                return Err(GatewayError::ElevationDenied(
                    "The operation was canceled by the user.".to_string(),
                ));
            }
        })
    }
}

#[async_trait]
impl ScriptGateway for ScenarioGateway {
    async fn execute(
        &self,
        invocation: &ScriptInvocation,
        cancel: &CancellationToken,
    ) -> Result<RawOutput, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        let reply = match invocation.operation {
            ScriptOperation::Mount => self.mount_reply(invocation)?,
            _ => ScriptReply::Success(Fields::new()),
        };
        Ok(RawOutput {
            exit_code: None,
            text: protocol::encode(&reply),
            stderr: String::new(),
        })
    }
}

/// [`KernelLog`] matching a fixed scenario
pub struct ScenarioKernelLog {
    scenario: Scenario,
}

impl ScenarioKernelLog {
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }
}

#[async_trait]
impl KernelLog for ScenarioKernelLog {
    async fn tail(
        &self,
        _distro: Option<&str>,
        _lines: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, BridgeError> {
        let mut lines = vec!["[    1.000000] EXT4-fs (sdc): mounted filesystem".to_string()];
        if self.scenario == Scenario::Incompatible {
            lines.push(
                "[   42.133700] EXT4-fs (sdd1): couldn't mount RDWR because of unsupported optional features (400)"
                    .to_string(),
            );
            lines.push(
                "[   42.133712] BTRFS error (device sdd1): cannot mount because of unknown incompatible features 0x3000"
                    .to_string(),
            );
        }
        Ok(lines)
    }
}
