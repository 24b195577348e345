// SPDX-License-Identifier: GPL-3.0-only

//! Hand-written collaborators for orchestration scenarios

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_contracts::{
    BridgeError, CommandOutput, CommandRunner, CommandSpec, DiskInventory, GatewayError,
    IndirectionError, KernelLog, MountStore, PathProbe, ProgressSink, RawOutput, ScriptGateway,
    ScriptInvocation, ScriptOperation, UserContextRunner,
};
use bridge_sys::protocol::{self, FailureReport, Fields, ScriptReply};
use bridge_sys::{AccessStrategy, AccessStrategyConfig, FailureClassifier, RetryPolicy};
use bridge_types::{
    ActiveMount, DiskCandidate, DriveLetter, FilesystemType, MappingMechanism, MountIdentity,
    PartitionCandidate,
};
use mount_bridge::{Collaborators, MountOrchestrator, OrchestratorSettings, default_paths};
use tokio_util::sync::CancellationToken;

pub const SHELL: &str = "powershell.exe";

pub fn letter(c: char) -> DriveLetter {
    DriveLetter::new(c).unwrap()
}

pub fn unc(disk: u32, partition: u32) -> String {
    default_paths(MountIdentity::new(disk, partition), "Ubuntu").1
}

pub fn ok_reply(fields: Fields) -> RawOutput {
    RawOutput {
        exit_code: None,
        text: protocol::encode(&ScriptReply::Success(fields)),
        stderr: String::new(),
    }
}

pub fn error_reply(message: &str, fields: Fields) -> RawOutput {
    RawOutput {
        exit_code: None,
        text: protocol::encode(&ScriptReply::Failure(FailureReport {
            message: message.to_string(),
            fields,
        })),
        stderr: String::new(),
    }
}

fn argument(invocation: &ScriptInvocation, name: &str) -> Option<String> {
    invocation
        .arguments
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.value.clone())
}

/// Gateway answering queued replies per operation
///
/// With nothing queued, mounts succeed at the default location and
/// unmounts succeed.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<HashMap<ScriptOperation, VecDeque<Result<RawOutput, GatewayError>>>>,
    pub calls: Mutex<Vec<ScriptInvocation>>,
}

impl ScriptedGateway {
    pub fn queue(&self, operation: ScriptOperation, reply: Result<RawOutput, GatewayError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn operations(&self) -> Vec<ScriptOperation> {
        self.calls.lock().unwrap().iter().map(|c| c.operation).collect()
    }
}

#[async_trait]
impl ScriptGateway for ScriptedGateway {
    async fn execute(
        &self,
        invocation: &ScriptInvocation,
        _cancel: &CancellationToken,
    ) -> Result<RawOutput, GatewayError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let queued = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&invocation.operation)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }

        match invocation.operation {
            ScriptOperation::Mount => {
                let disk: u32 = argument(invocation, "DiskIndex").unwrap().parse().unwrap();
                let partition: u32 = argument(invocation, "Partition").unwrap().parse().unwrap();
                let distro = argument(invocation, "Distro").unwrap_or_else(|| "Ubuntu".to_string());
                let (linux, unc) = default_paths(MountIdentity::new(disk, partition), &distro);
                Ok(ok_reply(
                    Fields::new()
                        .with(protocol::KEY_DISTRO, distro)
                        .with(protocol::KEY_LINUX_PATH, linux)
                        .with(protocol::KEY_UNC_PATH, unc),
                ))
            }
            _ => Ok(ok_reply(Fields::new())),
        }
    }
}

pub struct StaticInventory(pub Result<Vec<DiskCandidate>, BridgeError>);

#[async_trait]
impl DiskInventory for StaticInventory {
    async fn list_disks(&self) -> Result<Vec<DiskCandidate>, BridgeError> {
        self.0.clone()
    }
}

pub fn disk(index: u32, protected: bool, partitions: &[u32]) -> DiskCandidate {
    DiskCandidate {
        index,
        friendly_name: format!("Disk {}", index),
        size: 64 << 30,
        is_boot: protected,
        is_system: protected,
        partitions: partitions
            .iter()
            .map(|number| PartitionCandidate {
                number: *number,
                size: 32 << 30,
                kind: Some("Basic".to_string()),
            })
            .collect(),
    }
}

pub fn default_disks() -> Vec<DiskCandidate> {
    vec![disk(0, true, &[1, 2, 3]), disk(1, false, &[1, 2]), disk(2, false, &[1])]
}

#[derive(Default)]
pub struct MemoryStore {
    pub mounts: Mutex<Vec<ActiveMount>>,
}

impl MemoryStore {
    pub fn identities(&self) -> Vec<MountIdentity> {
        self.mounts.lock().unwrap().iter().map(|m| m.identity).collect()
    }
}

#[async_trait]
impl MountStore for MemoryStore {
    async fn list(&self) -> Result<Vec<ActiveMount>, BridgeError> {
        Ok(self.mounts.lock().unwrap().clone())
    }

    async fn upsert(&self, mount: ActiveMount) -> Result<(), BridgeError> {
        let mut mounts = self.mounts.lock().unwrap();
        match mounts.iter_mut().find(|m| m.identity == mount.identity) {
            Some(existing) => *existing = mount,
            None => mounts.push(mount),
        }
        Ok(())
    }

    async fn remove(&self, identity: MountIdentity) -> Result<bool, BridgeError> {
        let mut mounts = self.mounts.lock().unwrap();
        let before = mounts.len();
        mounts.retain(|m| m.identity != identity);
        Ok(mounts.len() != before)
    }
}

/// Probe answering from a set of reachable paths, or everything
#[derive(Default)]
pub struct FakeProbe {
    pub everything: bool,
    pub reachable: Mutex<HashSet<String>>,
    pub probed: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn everything() -> Self {
        Self {
            everything: true,
            ..Self::default()
        }
    }

    pub fn only(paths: &[String]) -> Self {
        Self {
            everything: false,
            reachable: Mutex::new(paths.iter().cloned().collect()),
            probed: Mutex::default(),
        }
    }
}

#[async_trait]
impl PathProbe for FakeProbe {
    async fn exists(&self, path: &str) -> bool {
        self.probed.lock().unwrap().push(path.to_string());
        self.everything || self.reachable.lock().unwrap().contains(path)
    }
}

#[derive(Default)]
pub struct FakeKernelLog {
    pub lines: Vec<String>,
    pub reads: Mutex<usize>,
}

impl FakeKernelLog {
    pub fn with_lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            reads: Mutex::new(0),
        }
    }
}

#[async_trait]
impl KernelLog for FakeKernelLog {
    async fn tail(
        &self,
        _distro: Option<&str>,
        lines: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, BridgeError> {
        *self.reads.lock().unwrap() += 1;
        let skip = self.lines.len().saturating_sub(lines);
        Ok(self.lines[skip..].to_vec())
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        status: Some(2),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Host with `subst` and `net use` tables; PowerShell drives are unavailable
#[derive(Default)]
pub struct FakeHost {
    pub mappings: Mutex<Vec<(MappingMechanism, DriveLetter, String)>>,
    pub commands: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn with_mapping(mechanism: MappingMechanism, c: char, target: &str) -> Self {
        let host = Self::default();
        host.mappings
            .lock()
            .unwrap()
            .push((mechanism, letter(c), target.to_string()));
        host
    }

    pub fn records_for(&self, c: char) -> Vec<String> {
        self.mappings
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, l, _)| *l == letter(c))
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    /// Commands that changed a table
    pub fn mutations(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c != "subst" && *c != "net use" && !c.starts_with(SHELL))
            .cloned()
            .collect()
    }

    fn listing(&self, mechanism: MappingMechanism) -> String {
        let mappings = self.mappings.lock().unwrap();
        let rows = mappings.iter().filter(|(m, _, _)| *m == mechanism);
        match mechanism {
            MappingMechanism::Substitution => rows
                .map(|(_, l, t)| format!("{}\\: => {}\r\n", l, t.replacen(r"\\", r"UNC\", 1)))
                .collect(),
            _ => {
                let mut out = String::from("Status  Local  Remote  Network\r\n----\r\n");
                for (_, l, t) in rows {
                    out.push_str(&format!("OK  {}  {}  Microsoft Windows Network\r\n", l, t));
                }
                out.push_str("The command completed successfully.\r\n");
                out
            }
        }
    }

    fn add(&self, mechanism: MappingMechanism, l: DriveLetter, target: &str) -> CommandOutput {
        let mut mappings = self.mappings.lock().unwrap();
        if mappings.iter().any(|(_, existing, _)| *existing == l) {
            return failed("The local device name is already in use.");
        }
        mappings.push((mechanism, l, target.to_string()));
        ok("")
    }

    fn drop_letter(&self, mechanism: MappingMechanism, l: DriveLetter) -> CommandOutput {
        let mut mappings = self.mappings.lock().unwrap();
        let before = mappings.len();
        mappings.retain(|(m, existing, _)| !(*m == mechanism && *existing == l));
        if mappings.len() < before {
            ok("")
        } else {
            failed("The network connection could not be found.")
        }
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(
        &self,
        spec: &CommandSpec,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, GatewayError> {
        self.commands.lock().unwrap().push(spec.render());

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        Ok(match (spec.program.as_str(), args.as_slice()) {
            ("subst", []) => ok(self.listing(MappingMechanism::Substitution)),
            ("subst", [dev, "/D"]) => {
                self.drop_letter(MappingMechanism::Substitution, dev.parse().unwrap())
            }
            ("subst", [dev, target]) => {
                self.add(MappingMechanism::Substitution, dev.parse().unwrap(), target)
            }
            ("net", ["use"]) => ok(self.listing(MappingMechanism::NetworkUse)),
            ("net", ["use", dev, "/delete", "/y"]) => {
                self.drop_letter(MappingMechanism::NetworkUse, dev.parse().unwrap())
            }
            ("net", ["use", dev, target, "/persistent:no"]) => {
                self.add(MappingMechanism::NetworkUse, dev.parse().unwrap(), target)
            }
            _ => failed("The term is not recognized as the name of a cmdlet."),
        })
    }
}

/// User-context runner whose scheduled task never reports back
#[derive(Default)]
pub struct StuckUserContext {
    pub attempts: Mutex<usize>,
}

#[async_trait]
impl UserContextRunner for StuckUserContext {
    async fn run_as_user(
        &self,
        _spec: &CommandSpec,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, IndirectionError> {
        *self.attempts.lock().unwrap() += 1;
        Err(IndirectionError::Timeout {
            task: "MountBridge-test".to_string(),
            after: Duration::from_millis(50),
        })
    }
}

/// Progress lines, in order
#[derive(Default)]
pub struct RecordingProgress(pub Mutex<Vec<String>>);

impl ProgressSink for RecordingProgress {
    fn report(&self, message: String) {
        self.0.lock().unwrap().push(message);
    }
}

/// One orchestrator and handles on every fake behind it
pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub host: Arc<FakeHost>,
    pub probe: Arc<FakeProbe>,
    pub kernel_log: Arc<FakeKernelLog>,
    pub store: Arc<MemoryStore>,
    pub inventory: Result<Vec<DiskCandidate>, BridgeError>,
    pub user_context: Option<Arc<dyn UserContextRunner>>,
    pub allowed_filesystems: Vec<FilesystemType>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            gateway: Arc::default(),
            host: Arc::default(),
            probe: Arc::new(FakeProbe::everything()),
            kernel_log: Arc::default(),
            store: Arc::default(),
            inventory: Ok(default_disks()),
            user_context: None,
            allowed_filesystems: FilesystemType::ALL.to_vec(),
        }
    }
}

impl Harness {
    pub fn orchestrator(&self) -> MountOrchestrator {
        let fast = RetryPolicy::new(3, Duration::from_millis(1));
        let mut access = AccessStrategy::new(
            self.host.clone(),
            self.probe.clone(),
            AccessStrategyConfig {
                probe: fast,
                shell: SHELL.to_string(),
                command_timeout: Duration::from_secs(1),
            },
        );
        if let Some(user_context) = &self.user_context {
            access = access.elevated(user_context.clone());
        }

        MountOrchestrator::new(
            Collaborators {
                gateway: self.gateway.clone(),
                classifier: FailureClassifier::new(self.kernel_log.clone(), 100),
                access,
                probe: self.probe.clone(),
                inventory: Arc::new(StaticInventory(self.inventory.clone())),
                store: self.store.clone(),
            },
            OrchestratorSettings {
                allowed_filesystems: self.allowed_filesystems.clone(),
                default_distro: Some("Ubuntu".to_string()),
                reachability: fast,
            },
        )
    }
}
