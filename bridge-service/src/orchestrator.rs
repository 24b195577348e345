// SPDX-License-Identifier: GPL-3.0-only

//! Mount orchestration
//!
//! A mount run walks `Validating → Mounting → VerifyingReachability →
//! MappingAccess → Registering` strictly in order and stops at the first
//! failing step. Nothing is rolled back: a mount whose mapping failed stays
//! mounted and the outcome's failed step tells the caller what to retry.

use std::sync::Arc;

use bridge_contracts::{
    BridgeError, DiskInventory, GatewayError, MountStore, PathProbe, ProgressSink, RawOutput,
    ScriptGateway, ScriptInvocation, ScriptOperation,
};
use bridge_sys::access::AccessStrategy;
use bridge_sys::protocol::{self, MountReply, ScriptReply};
use bridge_sys::retry::{PollError, RetryPolicy, poll_until};
use bridge_sys::{AccessError, FailureClassifier, ProtocolError, classifier};
use bridge_types::{
    AccessMode, AccessPoint, ActiveMount, DiskCandidate, DriveLetter, ErrorCategory, FailedStep,
    Failure, FilesystemType, MountIdentity, MountOutcome, MountRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Phrases meaning the partition is already attached
const ALREADY_MOUNTED: [&str; 2] = ["already mounted", "already attached"];

/// Phrases meaning there is nothing left to unmount
const NOT_ATTACHED: [&str; 3] = ["not currently attached", "file not found", "not mounted"];

const CONFLICT_HINT: &str =
    "Choose another drive letter or disconnect the existing mapping, then retry the mapping.";
const MAPPING_HINT: &str = "The partition is mounted; retry the mapping step only.";
const ELEVATION_HINT: &str = "Accept the administrator prompt to mount disks.";
const TIMEOUT_HINT: &str = "The operation did not report back in time; check for an open prompt and retry.";

/// Step a run is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Validating,
    Mounting,
    VerifyingReachability,
    MappingAccess,
    Registering,
    Done,
    Failed(FailedStep),
}

impl std::fmt::Display for MountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validating => f.write_str("validating request"),
            Self::Mounting => f.write_str("mounting partition"),
            Self::VerifyingReachability => f.write_str("verifying reachability"),
            Self::MappingAccess => f.write_str("mapping access point"),
            Self::Registering => f.write_str("registering mount"),
            Self::Done => f.write_str("done"),
            Self::Failed(step) => write!(f, "failed while {}", step),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub allowed_filesystems: Vec<FilesystemType>,
    pub default_distro: Option<String>,
    /// Post-mount reachability probing
    pub reachability: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            allowed_filesystems: FilesystemType::ALL.to_vec(),
            default_distro: None,
            reachability: RetryPolicy::new(5, std::time::Duration::from_secs(1)),
        }
    }
}

/// Everything the orchestrator talks to
pub struct Collaborators {
    pub gateway: Arc<dyn ScriptGateway>,
    pub classifier: FailureClassifier,
    pub access: AccessStrategy,
    pub probe: Arc<dyn PathProbe>,
    pub inventory: Arc<dyn DiskInventory>,
    pub store: Arc<dyn MountStore>,
}

/// Where a validated request will be exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessTarget {
    Letter(DriveLetter),
    Namespace,
}

#[derive(Debug, Clone)]
struct ValidatedRequest {
    identity: MountIdentity,
    filesystem: FilesystemType,
    distro: Option<String>,
    access: AccessTarget,
}

/// Paths the subsystem places a partition at by default
pub fn default_paths(identity: MountIdentity, distro: &str) -> (String, String) {
    let linux_path = format!(
        "/mnt/wsl/PHYSICALDRIVE{}p{}",
        identity.disk_index, identity.partition
    );
    let unc_path = format!(r"\\wsl$\{}{}", distro, linux_path.replace('/', "\\"));
    (linux_path, unc_path)
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    phrases.iter().any(|phrase| lowered.contains(phrase))
}

fn gateway_failure(step: FailedStep, error: &GatewayError) -> Failure {
    let category = match error {
        GatewayError::ElevationDenied(_) => ErrorCategory::ElevationDenied,
        e if e.is_timeout() => ErrorCategory::Timeout,
        _ => ErrorCategory::Generic,
    };
    let failure = Failure::new(step, category, error.to_string());
    match category {
        ErrorCategory::ElevationDenied => failure.with_hint(ELEVATION_HINT),
        ErrorCategory::Timeout => failure.with_hint(TIMEOUT_HINT),
        _ => failure,
    }
}

fn protocol_failure(step: FailedStep, error: &ProtocolError) -> Failure {
    Failure::new(
        step,
        ErrorCategory::Protocol,
        format!("malformed script output: {}", error),
    )
}

fn access_failure(error: &AccessError) -> Failure {
    let message = match error.mechanism() {
        Some(mechanism) => format!("{} [{}]", error, mechanism),
        None => error.to_string(),
    };
    let failure = Failure::new(FailedStep::MappingAccess, error.category(), message);
    match error {
        AccessError::Conflict { .. } => failure.with_hint(CONFLICT_HINT),
        _ => failure.with_hint(MAPPING_HINT),
    }
}

fn code_category(code: Option<&str>) -> Option<ErrorCategory> {
    match code?.to_ascii_uppercase().as_str() {
        "UNSUPPORTED" => Some(ErrorCategory::UnsupportedOperation),
        "ELEVATION_DENIED" => Some(ErrorCategory::ElevationDenied),
        _ => None,
    }
}

/// Drives mount, unmount and mapping runs
pub struct MountOrchestrator {
    gateway: Arc<dyn ScriptGateway>,
    classifier: FailureClassifier,
    access: AccessStrategy,
    probe: Arc<dyn PathProbe>,
    inventory: Arc<dyn DiskInventory>,
    store: Arc<dyn MountStore>,
    settings: OrchestratorSettings,
}

impl MountOrchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        Self {
            gateway: collaborators.gateway,
            classifier: collaborators.classifier,
            access: collaborators.access,
            probe: collaborators.probe,
            inventory: collaborators.inventory,
            store: collaborators.store,
            settings,
        }
    }

    fn enter(&self, state: MountState, subject: &str, progress: &dyn ProgressSink) {
        info!("{}: {}", subject, state);
        progress.report(format!("{}: {}", subject, state));
    }

    fn fail(
        &self,
        subject: &str,
        failure: Failure,
        builder: bridge_types::OutcomeBuilder,
        progress: &dyn ProgressSink,
    ) -> MountOutcome {
        warn!("{}: {} failed: {}", subject, failure.step, failure.message);
        self.enter(MountState::Failed(failure.step), subject, progress);
        builder.failed(failure)
    }

    /// Mount a partition and expose it
    pub async fn mount(
        &self,
        request: &MountRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> MountOutcome {
        let subject = format!("disk {} partition {}", request.disk_index, request.partition);

        self.enter(MountState::Validating, &subject, progress);
        let validated = match self.validate(request).await {
            Ok(validated) => validated,
            Err(failure) => {
                return self.fail(&subject, failure, MountOutcome::builder(), progress);
            }
        };

        self.enter(MountState::Mounting, &subject, progress);
        let reply = match self.mount_partition(&validated, cancel).await {
            Ok(reply) => reply,
            Err(failure) => {
                return self.fail(&subject, failure, MountOutcome::builder(), progress);
            }
        };
        if reply.already_mounted {
            info!("{} was already mounted", validated.identity);
        }

        let builder = MountOutcome::builder()
            .distro(&reply.distro)
            .linux_path(&reply.linux_path)
            .unc_path(&reply.unc_path)
            .already_mounted(reply.already_mounted);

        self.enter(MountState::VerifyingReachability, &subject, progress);
        let verified = match self.wait_reachable(&reply.unc_path, cancel).await {
            Ok(verified) => verified,
            Err(failure) => return self.fail(&subject, failure, builder, progress),
        };
        let builder = builder.verified(verified);

        self.enter(MountState::MappingAccess, &subject, progress);
        let (access, access_path) = match validated.access {
            AccessTarget::Letter(letter) => {
                match self.access.map(letter, &reply.unc_path, cancel).await {
                    Ok(report) => {
                        if report.reused {
                            debug!("{} reused an identical mapping", letter);
                        }
                        (AccessPoint::DriveLetter(letter), format!("{}\\", letter))
                    }
                    Err(e) => return self.fail(&subject, access_failure(&e), builder, progress),
                }
            }
            AccessTarget::Namespace => (AccessPoint::Namespace, reply.unc_path.clone()),
        };
        let builder = builder.access_path(&access_path);

        self.enter(MountState::Registering, &subject, progress);
        let record = ActiveMount::new(
            validated.identity,
            access,
            &reply.distro,
            &reply.linux_path,
            &reply.unc_path,
            verified,
        );
        if let Err(e) = self.store.upsert(record).await {
            let failure = Failure::new(
                FailedStep::Registering,
                ErrorCategory::Generic,
                format!("mounted but not recorded: {}", e),
            )
            .with_hint(MAPPING_HINT);
            return self.fail(&subject, failure, builder, progress);
        }

        self.enter(MountState::Done, &subject, progress);
        builder.succeeded()
    }

    async fn validate(&self, request: &MountRequest) -> Result<ValidatedRequest, Failure> {
        let invalid = |message: String| {
            Failure::new(FailedStep::Validating, ErrorCategory::Validation, message)
        };

        if request.disk_index < 0 {
            return Err(invalid(format!(
                "disk index {} must not be negative",
                request.disk_index
            )));
        }
        if request.partition < 1 {
            return Err(invalid(format!(
                "partition {} must be 1 or greater",
                request.partition
            )));
        }
        let Some(identity) = request.identity() else {
            return Err(invalid(format!(
                "disk {} partition {} is out of range",
                request.disk_index, request.partition
            )));
        };
        if !self.settings.allowed_filesystems.contains(&request.filesystem) {
            return Err(invalid(format!(
                "filesystem {} is not allowed",
                request.filesystem
            )));
        }

        let access = match (request.access_mode, request.drive_letter) {
            (Some(AccessMode::Namespace), Some(letter)) => {
                return Err(invalid(format!(
                    "drive letter {} cannot be combined with namespace access",
                    letter
                )));
            }
            (Some(AccessMode::DriveLetter), None) => {
                return Err(invalid("drive letter access needs a drive letter".to_string()));
            }
            (_, Some(letter)) if letter.is_reserved() => {
                return Err(invalid(format!("drive letter {} is reserved", letter)));
            }
            (_, Some(letter)) => AccessTarget::Letter(letter),
            (_, None) => AccessTarget::Namespace,
        };

        // Callers pick from the same inventory, but it may have changed since.
        let disks = self.inventory.list_disks().await.map_err(|e| {
            warn!("Disk inventory unavailable, refusing to mount: {}", e);
            invalid(format!("cannot confirm disk {} is safe to mount: {}", identity.disk_index, e))
        })?;
        let disk: &DiskCandidate = disks
            .iter()
            .find(|d| d.index == identity.disk_index)
            .ok_or_else(|| invalid(format!("disk {} does not exist", identity.disk_index)))?;
        if disk.is_protected() {
            return Err(invalid(format!(
                "disk {} ({}) holds the running system and cannot be mounted",
                disk.index, disk.friendly_name
            ))
            .with_hint("Pick an external or secondary disk."));
        }
        if !disk.partitions.is_empty() && !disk.has_partition(identity.partition) {
            return Err(invalid(format!(
                "disk {} has no partition {}",
                disk.index, identity.partition
            )));
        }

        Ok(ValidatedRequest {
            identity,
            filesystem: request.filesystem,
            distro: request
                .distro
                .clone()
                .or_else(|| self.settings.default_distro.clone()),
            access,
        })
    }

    async fn mount_partition(
        &self,
        request: &ValidatedRequest,
        cancel: &CancellationToken,
    ) -> Result<MountReply, Failure> {
        let invocation = ScriptInvocation::new(ScriptOperation::Mount, true)
            .arg("DiskIndex", request.identity.disk_index)
            .arg("Partition", request.identity.partition)
            .arg_opt("FsType", Some(request.filesystem).filter(|fs| !fs.is_auto()))
            .arg_opt("Distro", request.distro.as_deref());

        let raw = self
            .gateway
            .execute(&invocation, cancel)
            .await
            .map_err(|e| gateway_failure(FailedStep::Mounting, &e))?;

        match protocol::decode(&raw.text) {
            Ok(ScriptReply::Success(fields)) => MountReply::try_from(&fields)
                .map_err(|e| protocol_failure(FailedStep::Mounting, &e)),
            Ok(ScriptReply::Failure(report)) => {
                if contains_any(&report.message, &ALREADY_MOUNTED) {
                    return self.already_mounted(request, &report.fields);
                }
                if let Some(category) = code_category(report.code()) {
                    let failure = Failure::new(FailedStep::Mounting, category, &report.message);
                    return Err(if category == ErrorCategory::ElevationDenied {
                        failure.with_hint(ELEVATION_HINT)
                    } else {
                        failure
                    });
                }
                Err(self.classified(&report.message, request, cancel).await)
            }
            Err(e) if raw.exited_nonzero() => {
                debug!("Unstructured mount failure ({}), classifying raw text", e);
                let text = unstructured_text(&raw);
                if contains_any(&text, &ALREADY_MOUNTED) {
                    return self.already_mounted(request, &protocol::Fields::new());
                }
                Err(self.classified(&text, request, cancel).await)
            }
            Err(e) => Err(protocol_failure(FailedStep::Mounting, &e)),
        }
    }

    async fn classified(
        &self,
        message: &str,
        request: &ValidatedRequest,
        cancel: &CancellationToken,
    ) -> Failure {
        let classification = self
            .classifier
            .classify(message, request.distro.as_deref(), cancel)
            .await;
        Failure::new(
            FailedStep::Mounting,
            classification.category,
            classifier::sanitize(message),
        )
        .with_hint(classification.hint)
        .with_diagnostic(classification.diagnostic)
    }

    /// Reply for a partition that was mounted before this run
    fn already_mounted(
        &self,
        request: &ValidatedRequest,
        fields: &protocol::Fields,
    ) -> Result<MountReply, Failure> {
        if let Ok(mut reply) = MountReply::try_from(fields) {
            reply.already_mounted = true;
            return Ok(reply);
        }
        let Some(distro) = fields
            .get(protocol::KEY_DISTRO)
            .map(str::to_string)
            .or_else(|| request.distro.clone())
        else {
            return Err(protocol_failure(
                FailedStep::Mounting,
                &ProtocolError::MissingKey(protocol::KEY_DISTRO),
            ));
        };
        let (linux_path, unc_path) = default_paths(request.identity, &distro);
        Ok(MountReply {
            distro,
            linux_path,
            unc_path,
            already_mounted: true,
        })
    }

    /// `Ok(false)` when the path never answered; that is not fatal
    async fn wait_reachable(&self, path: &str, cancel: &CancellationToken) -> Result<bool, Failure> {
        let polled = poll_until(self.settings.reachability, cancel, |attempt| {
            let probe = self.probe.clone();
            let path = path.to_string();
            async move {
                let reachable = probe.exists(&path).await;
                if !reachable {
                    debug!("{} not reachable (attempt {})", path, attempt);
                }
                reachable.then_some(())
            }
        })
        .await;

        match polled {
            Ok(()) => Ok(true),
            Err(PollError::Exhausted { attempts }) => {
                warn!("{} still unreachable after {} attempts, continuing unverified", path, attempts);
                Ok(false)
            }
            Err(PollError::Cancelled) => Err(Failure::new(
                FailedStep::VerifyingReachability,
                ErrorCategory::Generic,
                "cancelled",
            )),
        }
    }

    /// Remove the access mapping, then detach the partition
    ///
    /// Detaching something that is no longer attached counts as success.
    pub async fn unmount(
        &self,
        identity: MountIdentity,
        distro: Option<&str>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> MountOutcome {
        let subject = identity.to_string();
        let record = match self.store.get(identity).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Could not read mount record for {}: {}", identity, e);
                None
            }
        };

        let mut builder = MountOutcome::builder();
        if let Some(record) = &record {
            builder = builder
                .distro(&record.distro)
                .linux_path(&record.linux_path)
                .unc_path(&record.unc_path);
        }

        if let Some(letter) = record.as_ref().and_then(|r| r.access.drive_letter()) {
            progress.report(format!("{}: removing {}", subject, letter));
            match self.access.unmap(letter, cancel).await {
                Ok(Some(mechanism)) => debug!("Removed {} ({})", letter, mechanism),
                Ok(None) => debug!("{} was not mapped", letter),
                Err(e) => {
                    let failure = Failure::new(FailedStep::Unmapping, e.category(), e.to_string());
                    return self.fail(&subject, failure, builder, progress);
                }
            }
        }

        progress.report(format!("{}: detaching partition", subject));
        let distro = distro
            .map(str::to_string)
            .or_else(|| record.as_ref().map(|r| r.distro.clone()))
            .or_else(|| self.settings.default_distro.clone());
        let invocation = ScriptInvocation::new(ScriptOperation::Unmount, true)
            .arg("DiskIndex", identity.disk_index)
            .arg("Partition", identity.partition)
            .arg_opt("Distro", distro);

        let raw = match self.gateway.execute(&invocation, cancel).await {
            Ok(raw) => raw,
            Err(e) => {
                return self.fail(
                    &subject,
                    gateway_failure(FailedStep::Unmounting, &e),
                    builder,
                    progress,
                );
            }
        };
        if let Err(failure) = unmount_result(&raw) {
            return self.fail(&subject, failure, builder, progress);
        }

        match self.store.remove(identity).await {
            Ok(true) => debug!("Removed record for {}", identity),
            Ok(false) => {}
            Err(e) => {
                let failure = Failure::new(
                    FailedStep::Registering,
                    ErrorCategory::Generic,
                    format!("unmounted but record not removed: {}", e),
                );
                return self.fail(&subject, failure, builder, progress);
            }
        }

        info!("{} unmounted", subject);
        progress.report(format!("{}: {}", subject, MountState::Done));
        builder.succeeded()
    }

    /// Redo only the mapping step for a mounted partition
    pub async fn remap(
        &self,
        identity: MountIdentity,
        letter: DriveLetter,
        distro: Option<&str>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> MountOutcome {
        let subject = identity.to_string();
        if letter.is_reserved() {
            let failure = Failure::new(
                FailedStep::Validating,
                ErrorCategory::Validation,
                format!("drive letter {} is reserved", letter),
            );
            return self.fail(&subject, failure, MountOutcome::builder(), progress);
        }

        let existing = match self.store.get(identity).await {
            Ok(existing) => existing,
            Err(e) => {
                let failure = Failure::new(
                    FailedStep::Validating,
                    ErrorCategory::Generic,
                    format!("cannot read mount records: {}", e),
                );
                return self.fail(&subject, failure, MountOutcome::builder(), progress);
            }
        };

        // A mount whose mapping failed was never recorded, so fall back to
        // the default mount location.
        let mut record = match existing {
            Some(record) => record,
            None => {
                let Some(distro) = distro
                    .map(str::to_string)
                    .or_else(|| self.settings.default_distro.clone())
                else {
                    let failure = Failure::new(
                        FailedStep::Validating,
                        ErrorCategory::Validation,
                        format!("{} is not recorded; name its distribution", identity),
                    );
                    return self.fail(&subject, failure, MountOutcome::builder(), progress);
                };
                let (linux_path, unc_path) = default_paths(identity, &distro);
                ActiveMount::new(
                    identity,
                    AccessPoint::Namespace,
                    distro,
                    linux_path,
                    unc_path,
                    false,
                )
            }
        };

        let builder = MountOutcome::builder()
            .distro(&record.distro)
            .linux_path(&record.linux_path)
            .unc_path(&record.unc_path)
            .already_mounted(true);

        self.enter(MountState::MappingAccess, &subject, progress);
        // The previous letter keeps working until the new one is in place.
        let report = match self.access.map(letter, &record.unc_path, cancel).await {
            Ok(report) => report,
            Err(e) => return self.fail(&subject, access_failure(&e), builder, progress),
        };
        if let Some(previous) = record.access.drive_letter().filter(|l| *l != letter) {
            match self.access.unmap(previous, cancel).await {
                Ok(_) => debug!("Released previous letter {}", previous),
                Err(e) => warn!("Could not release {}: {}", previous, e),
            }
        }

        record.access = AccessPoint::DriveLetter(report.letter);
        record.mark_verified(true);
        let builder = builder
            .verified(true)
            .access_path(format!("{}\\", report.letter));

        self.enter(MountState::Registering, &subject, progress);
        if let Err(e) = self.store.upsert(record).await {
            let failure = Failure::new(
                FailedStep::Registering,
                ErrorCategory::Generic,
                format!("mapped but not recorded: {}", e),
            );
            return self.fail(&subject, failure, builder, progress);
        }

        self.enter(MountState::Done, &subject, progress);
        builder.succeeded()
    }

    /// Re-probe a recorded mount and store the result
    pub async fn verify(
        &self,
        identity: MountIdentity,
        cancel: &CancellationToken,
    ) -> Result<Option<ActiveMount>, BridgeError> {
        let Some(mut record) = self.store.get(identity).await? else {
            return Ok(None);
        };
        let reachable = match self.wait_reachable(&record.unc_path, cancel).await {
            Ok(reachable) => reachable,
            Err(failure) => {
                debug!("{} left as recorded: {}", identity, failure.message);
                return Err(BridgeError::cancelled(failure.message));
            }
        };
        record.mark_verified(reachable);
        info!("{} verified: {}", identity, reachable);
        self.store.upsert(record.clone()).await?;
        Ok(Some(record))
    }

    pub async fn status(&self) -> Result<Vec<ActiveMount>, BridgeError> {
        self.store.list().await
    }

    pub async fn disks(&self) -> Result<Vec<DiskCandidate>, BridgeError> {
        self.inventory.list_disks().await
    }
}

fn unstructured_text(raw: &RawOutput) -> String {
    [raw.stderr.trim(), raw.text.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn unmount_result(raw: &RawOutput) -> Result<(), Failure> {
    let message = match protocol::decode(&raw.text) {
        Ok(ScriptReply::Success(_)) => return Ok(()),
        Ok(ScriptReply::Failure(report)) => {
            if let Some(category) = code_category(report.code()) {
                return Err(Failure::new(FailedStep::Unmounting, category, report.message));
            }
            report.message
        }
        Err(_) if raw.exited_nonzero() => unstructured_text(raw),
        Err(e) => return Err(protocol_failure(FailedStep::Unmounting, &e)),
    };

    if contains_any(&message, &NOT_ATTACHED) {
        debug!("Nothing to unmount: {}", message);
        return Ok(());
    }
    Err(Failure::new(
        FailedStep::Unmounting,
        ErrorCategory::Generic,
        classifier::sanitize(&message),
    ))
}
