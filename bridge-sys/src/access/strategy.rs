// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use bridge_contracts::{
    CommandOutput, CommandRunner, CommandSpec, GatewayError, IndirectionError, PathProbe,
    UserContextRunner,
};
use bridge_types::{
    AccessMappingAttempt, AttemptOutcome, DriveLetter, MappingMechanism, VerificationMethod,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::normalize::{clean_target, is_namespace_path, normalize_target};
use super::tables::{self, MappingEntry};
use crate::error::AccessError;
use crate::powershell;
use crate::retry::{PollError, RetryPolicy, poll_until};

#[derive(Debug, Clone)]
pub struct AccessStrategyConfig {
    /// Reachability probing before any mapping is touched
    pub probe: RetryPolicy,
    pub shell: String,
    /// Limit for each table query or mapping command
    pub command_timeout: Duration,
}

impl Default for AccessStrategyConfig {
    fn default() -> Self {
        Self {
            probe: RetryPolicy::new(15, Duration::from_secs(1)),
            shell: powershell::DEFAULT_SHELL.to_string(),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a successful [`AccessStrategy::map`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingReport {
    pub letter: DriveLetter,
    pub target: String,
    pub mechanism: MappingMechanism,
    pub attempts: Vec<AccessMappingAttempt>,
    /// The letter already pointed at the target and was recreated
    pub reused: bool,
    /// `None` when browsing cannot be checked from this context
    pub browsable: Option<bool>,
}

/// Exposes paths at drive letters through whichever table accepts them
///
/// When the process is elevated its mappings would be invisible to the
/// desktop session, so every table query and mutation then goes through
/// the [`UserContextRunner`].
pub struct AccessStrategy {
    runner: Arc<dyn CommandRunner>,
    user_context: Option<Arc<dyn UserContextRunner>>,
    probe: Arc<dyn PathProbe>,
    config: AccessStrategyConfig,
}

impl AccessStrategy {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn PathProbe>,
        config: AccessStrategyConfig,
    ) -> Self {
        Self {
            runner,
            user_context: None,
            probe,
            config,
        }
    }

    /// Route every command through `user_context`
    pub fn elevated(mut self, user_context: Arc<dyn UserContextRunner>) -> Self {
        self.user_context = Some(user_context);
        self
    }

    pub fn is_elevated(&self) -> bool {
        self.user_context.is_some()
    }

    fn verification(&self) -> VerificationMethod {
        if self.is_elevated() {
            VerificationMethod::UserContextQuery
        } else {
            VerificationMethod::DirectQuery
        }
    }

    /// Mechanisms to try for a normalized target, best first
    pub fn priority(normalized: &str) -> &'static [MappingMechanism] {
        const NAMESPACE: [MappingMechanism; 3] = [
            MappingMechanism::Substitution,
            MappingMechanism::NetworkUse,
            MappingMechanism::FilesystemProvider,
        ];
        const NETWORK: [MappingMechanism; 2] = [
            MappingMechanism::NetworkUse,
            MappingMechanism::FilesystemProvider,
        ];
        const LOCAL: [MappingMechanism; 2] = [
            MappingMechanism::Substitution,
            MappingMechanism::FilesystemProvider,
        ];

        if is_namespace_path(normalized) {
            &NAMESPACE
        } else if normalized.starts_with(r"\\") {
            &NETWORK
        } else {
            &LOCAL
        }
    }

    /// Map `letter` to `target`, reusing an identical mapping and refusing
    /// to touch a different one
    pub async fn map(
        &self,
        letter: DriveLetter,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<MappingReport, AccessError> {
        let target = clean_target(target);
        let wanted = normalize_target(&target);

        self.wait_reachable(&target, cancel).await?;

        let mut reused = false;
        if let Some(existing) = self.lookup(letter, cancel).await? {
            if existing.local_volume || normalize_target(&existing.target) != wanted {
                warn!(
                    "{} is taken by {} ({}), not overwriting",
                    letter, existing.target, existing.mechanism
                );
                return Err(AccessError::Conflict {
                    letter,
                    existing: existing.target,
                    mechanism: existing.mechanism,
                });
            }
            info!(
                "{} already maps {} via {}, recreating",
                letter, target, existing.mechanism
            );
            self.remove(existing.mechanism, letter, cancel).await?;
            reused = true;
        }

        let verification = self.verification();
        let mut attempts = Vec::new();

        for &mechanism in Self::priority(&wanted) {
            debug!("Mapping {} to {} via {}", letter, target, mechanism);
            let command = tables::map_command(
                mechanism,
                letter,
                &target,
                &self.config.shell,
                self.config.command_timeout,
            );
            let output = self.run(&command, cancel).await?;

            if !output.success() {
                let reason = failure_text(&output);
                warn!("{} could not map {}: {}", mechanism, letter, reason);
                attempts.push(AccessMappingAttempt {
                    mechanism,
                    outcome: AttemptOutcome::Failed(reason),
                    verification: VerificationMethod::NotVerified,
                });
                continue;
            }

            // Re-read the same table in the same context as the mutation.
            let recorded = self
                .read_table(mechanism, cancel)
                .await?
                .and_then(|entries| entries.into_iter().find(|e| e.letter == letter));

            match recorded {
                Some(entry) if normalize_target(&entry.target) == wanted => {
                    attempts.push(AccessMappingAttempt {
                        mechanism,
                        outcome: AttemptOutcome::Mapped,
                        verification,
                    });
                    let browsable = self.check_browsable(letter).await;
                    info!("{} mapped to {} via {}", letter, target, mechanism);
                    return Ok(MappingReport {
                        letter,
                        target,
                        mechanism,
                        attempts,
                        reused,
                        browsable,
                    });
                }
                Some(entry) => {
                    // The letter was free and the command succeeded, so the
                    // row is ours even though it reads back differently.
                    warn!(
                        "{} reported {} as {}, expected {}",
                        mechanism, letter, entry.target, target
                    );
                    self.discard(mechanism, letter, cancel).await?;
                    attempts.push(AccessMappingAttempt {
                        mechanism,
                        outcome: AttemptOutcome::Unverified(format!(
                            "{} listed as {}",
                            letter, entry.target
                        )),
                        verification,
                    });
                }
                None => {
                    warn!("{} reported success but {} is not listed", mechanism, letter);
                    self.discard(mechanism, letter, cancel).await?;
                    attempts.push(AccessMappingAttempt {
                        mechanism,
                        outcome: AttemptOutcome::Unverified(format!(
                            "{} missing from the {} table",
                            letter, mechanism
                        )),
                        verification,
                    });
                }
            }
        }

        Err(AccessError::Exhausted { letter, attempts })
    }

    /// Remove whatever mapping holds `letter`
    ///
    /// Returns the mechanism that held it, or `None` when nothing did.
    pub async fn unmap(
        &self,
        letter: DriveLetter,
        cancel: &CancellationToken,
    ) -> Result<Option<MappingMechanism>, AccessError> {
        let Some(entry) = self.lookup(letter, cancel).await? else {
            debug!("{} is not mapped", letter);
            return Ok(None);
        };
        if entry.local_volume {
            debug!("{} is a local volume, leaving it alone", letter);
            return Ok(None);
        }

        self.remove(entry.mechanism, letter, cancel).await?;
        info!("Removed {} ({})", letter, entry.mechanism);
        Ok(Some(entry.mechanism))
    }

    /// Current mapping of `letter`, searching every table in order
    pub async fn lookup(
        &self,
        letter: DriveLetter,
        cancel: &CancellationToken,
    ) -> Result<Option<MappingEntry>, AccessError> {
        for mechanism in MappingMechanism::TABLES {
            let Some(entries) = self.read_table(mechanism, cancel).await? else {
                continue;
            };
            if let Some(entry) = entries.into_iter().find(|e| e.letter == letter) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn wait_reachable(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AccessError> {
        let reachable = poll_until(self.config.probe, cancel, |attempt| {
            let probe = self.probe.clone();
            let path = target.to_string();
            async move {
                if probe.exists(&path).await {
                    Some(())
                } else {
                    debug!("{} not reachable yet (attempt {})", path, attempt);
                    None
                }
            }
        })
        .await;

        match reachable {
            Ok(()) => Ok(()),
            Err(PollError::Cancelled) => Err(AccessError::Cancelled),
            Err(PollError::Exhausted { attempts }) => Err(AccessError::Unreachable {
                target: target.to_string(),
                attempts,
            }),
        }
    }

    async fn check_browsable(&self, letter: DriveLetter) -> Option<bool> {
        if self.is_elevated() {
            return None;
        }
        let root = format!("{}\\", letter.device());
        let browsable = self.probe.is_browsable(&root).await;
        if !browsable {
            warn!("{} is mapped but cannot be listed yet", letter);
        }
        Some(browsable)
    }

    async fn remove(
        &self,
        mechanism: MappingMechanism,
        letter: DriveLetter,
        cancel: &CancellationToken,
    ) -> Result<(), AccessError> {
        let command = tables::unmap_command(
            mechanism,
            letter,
            &self.config.shell,
            self.config.command_timeout,
        );
        let output = self.run(&command, cancel).await?;
        if output.success() {
            Ok(())
        } else {
            Err(AccessError::RemovalFailed {
                letter,
                mechanism,
                reason: failure_text(&output),
            })
        }
    }

    /// Undo an unverified attempt so the next mechanism finds the letter free
    async fn discard(
        &self,
        mechanism: MappingMechanism,
        letter: DriveLetter,
        cancel: &CancellationToken,
    ) -> Result<(), AccessError> {
        match self.remove(mechanism, letter, cancel).await {
            Err(AccessError::RemovalFailed { reason, .. }) => {
                debug!("Nothing to undo for {} via {}: {}", letter, mechanism, reason);
                Ok(())
            }
            other => other,
        }
    }

    /// Parsed table, or `None` when it could not be read
    async fn read_table(
        &self,
        mechanism: MappingMechanism,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<MappingEntry>>, AccessError> {
        let command =
            tables::query_command(mechanism, &self.config.shell, self.config.command_timeout);
        let output = self.run(&command, cancel).await?;
        if !output.success() {
            warn!("Could not list {} table: {}", mechanism, failure_text(&output));
            return Ok(None);
        }
        match tables::parse_table(mechanism, &output.stdout) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                warn!("Unreadable {} table: {}", mechanism, e);
                Ok(None)
            }
        }
    }

    /// Run in the right context; only indirection and cancellation are fatal
    async fn run(
        &self,
        command: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AccessError> {
        if let Some(user_context) = &self.user_context {
            return match user_context.run_as_user(command, cancel).await {
                Ok(output) => Ok(output),
                Err(IndirectionError::Timeout { task, after }) => Err(
                    AccessError::IndirectionTimeout(format!("{} after {:?}", task, after)),
                ),
                Err(IndirectionError::Cancelled)
                | Err(IndirectionError::Gateway(GatewayError::Cancelled)) => {
                    Err(AccessError::Cancelled)
                }
                Err(e) => Err(AccessError::Indirection(e.to_string())),
            };
        }

        match self.runner.run(command, cancel).await {
            Ok(output) => Ok(output),
            Err(GatewayError::Cancelled) => Err(AccessError::Cancelled),
            Err(e) => Ok(CommandOutput {
                status: None,
                stdout: String::new(),
                stderr: e.to_string(),
            }),
        }
    }
}

fn failure_text(output: &CommandOutput) -> String {
    let text = output.error_text();
    if text.is_empty() {
        format!("exit status {:?}", output.status)
    } else {
        text.to_string()
    }
}
