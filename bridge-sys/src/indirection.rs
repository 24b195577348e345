// SPDX-License-Identifier: GPL-3.0-only

//! Running commands as the interactive user from an elevated process
//!
//! A one-shot scheduled task is registered under the desktop user's
//! principal with a limited token. It runs a generated wrapper script that
//! captures the command's output and exit code into a file, which is
//! written under a temporary name and renamed once complete. The task and
//! every file are removed afterwards, whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_contracts::{
    CommandOutput, CommandRunner, CommandSpec, IndirectionError, UserContextRunner,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::powershell;
use crate::process::decode_console_bytes;
use crate::retry::{PollError, RetryPolicy, poll_until};

const TASK_PREFIX: &str = "MountBridge";
const EXIT_MARKER: &str = "__EXIT=";
const USER_QUERY: &str = "(Get-CimInstance -ClassName Win32_ComputerSystem).UserName";

#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    pub shell: String,
    /// Directory shared between the elevated process and the user's task
    pub exchange_dir: PathBuf,
    /// How long to wait for the task to report back
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Limit for each `schtasks` call
    pub command_timeout: Duration,
    /// Principal to run as; the console user when unset
    pub user: Option<String>,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            shell: powershell::DEFAULT_SHELL.to_string(),
            exchange_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            command_timeout: Duration::from_secs(15),
            user: None,
        }
    }
}

/// Wrapper script and its output files, removed on drop
struct TaskFiles {
    wrapper: PathBuf,
    partial: PathBuf,
    output: PathBuf,
}

impl TaskFiles {
    fn new(dir: &Path, id: Uuid) -> Self {
        let stem = format!("mount-bridge-task-{}", id);
        Self {
            wrapper: dir.join(format!("{}.ps1", stem)),
            partial: dir.join(format!("{}.partial", stem)),
            output: dir.join(format!("{}.out", stem)),
        }
    }
}

impl Drop for TaskFiles {
    fn drop(&mut self) {
        for path in [&self.wrapper, &self.partial, &self.output] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove task file {:?}: {}", path, e),
            }
        }
    }
}

/// Script the task runs: execute, capture, then publish atomically
pub fn wrapper_script(command: &CommandSpec, partial: &Path, output: &Path) -> String {
    format!(
        "$ErrorActionPreference = 'Continue'\r\n\
         $text = & {program} {args} 2>&1 | Out-String\r\n\
         $code = $LASTEXITCODE\r\n\
         if ($null -eq $code) {{ $code = 0 }}\r\n\
         Set-Content -LiteralPath {partial} -Value ($text + \"`r`n{marker}$code\") -Encoding UTF8\r\n\
         Move-Item -LiteralPath {partial} -Destination {output} -Force\r\n",
        program = powershell::quote(&command.program),
        args = powershell::quote_array(&command.args),
        partial = powershell::quote(&partial.display().to_string()),
        output = powershell::quote(&output.display().to_string()),
        marker = EXIT_MARKER,
    )
}

/// Split captured task output into text and exit status
pub fn parse_task_output(text: &str) -> CommandOutput {
    let text = text.trim_start_matches('\u{feff}').trim_end();
    match text.rfind(EXIT_MARKER) {
        Some(pos) => CommandOutput {
            status: text[pos + EXIT_MARKER.len()..].trim().parse().ok(),
            stdout: text[..pos].trim_end().to_string(),
            stderr: String::new(),
        },
        None => CommandOutput {
            status: None,
            stdout: text.to_string(),
            stderr: String::new(),
        },
    }
}

/// [`UserContextRunner`] backed by the Windows task scheduler
pub struct ScheduledTaskRunner {
    config: TaskRunnerConfig,
    runner: Arc<dyn CommandRunner>,
}

impl ScheduledTaskRunner {
    pub fn new(config: TaskRunnerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn resolve_user(&self, cancel: &CancellationToken) -> Result<String, IndirectionError> {
        if let Some(user) = &self.config.user {
            return Ok(user.clone());
        }

        let query = powershell::command(&self.config.shell, USER_QUERY, self.config.command_timeout);
        let output = self.runner.run(&query, cancel).await?;
        let user = output.stdout.trim();
        if !output.success() || user.is_empty() {
            warn!("No interactive user found: {}", output.error_text());
            return Err(IndirectionError::NoInteractiveUser);
        }
        Ok(user.to_string())
    }

    async fn schtasks<I, S>(
        &self,
        task: &str,
        args: I,
        cancel: &CancellationToken,
    ) -> Result<(), IndirectionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new("schtasks")
            .args(args)
            .timeout(self.config.command_timeout);
        let output = self.runner.run(&spec, cancel).await?;
        if output.success() {
            Ok(())
        } else {
            Err(IndirectionError::Schedule {
                task: task.to_string(),
                reason: output.error_text().to_string(),
            })
        }
    }

    async fn run_task(
        &self,
        task: &str,
        files: &TaskFiles,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, IndirectionError> {
        self.schtasks(task, ["/Run", "/TN", task], cancel).await?;

        let policy = RetryPolicy::from_timeout(self.config.timeout, self.config.poll_interval);
        let output = files.output.as_path();
        let polled = poll_until(policy, cancel, |_| async move {
            match tokio::fs::read(output).await {
                Ok(bytes) if !bytes.is_empty() => Some(decode_console_bytes(&bytes)),
                _ => None,
            }
        })
        .await;

        match polled {
            Ok(text) => Ok(parse_task_output(&text)),
            Err(PollError::Cancelled) => Err(IndirectionError::Cancelled),
            Err(PollError::Exhausted { .. }) => {
                warn!("Task {} did not report within {:?}", task, self.config.timeout);
                Err(IndirectionError::Timeout {
                    task: task.to_string(),
                    after: self.config.timeout,
                })
            }
        }
    }

    async fn delete_task(&self, task: &str) {
        // Cleanup must happen even when the caller's token has fired.
        let cleanup = CancellationToken::new();
        if let Err(e) = self
            .schtasks(task, ["/Delete", "/TN", task, "/F"], &cleanup)
            .await
        {
            warn!("Failed to delete task {}: {}", task, e);
        }
    }
}

#[async_trait]
impl UserContextRunner for ScheduledTaskRunner {
    async fn run_as_user(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, IndirectionError> {
        let user = self.resolve_user(cancel).await?;
        let id = Uuid::new_v4();
        let task = format!("{}-{}", TASK_PREFIX, id);
        let files = TaskFiles::new(&self.config.exchange_dir, id);

        let script = wrapper_script(spec, &files.partial, &files.output);
        tokio::fs::write(&files.wrapper, script)
            .await
            .map_err(|e| IndirectionError::Schedule {
                task: task.clone(),
                reason: format!("failed to write {:?}: {}", files.wrapper, e),
            })?;

        let action = format!(
            "{} -NoProfile -NonInteractive -ExecutionPolicy Bypass -WindowStyle Hidden -File \"{}\"",
            self.config.shell,
            files.wrapper.display()
        );
        debug!("Scheduling {} as {}: {}", task, user, spec.render());
        self.schtasks(
            &task,
            [
                "/Create",
                "/TN",
                task.as_str(),
                "/TR",
                action.as_str(),
                "/SC",
                "ONCE",
                "/ST",
                "00:00",
                "/F",
                "/RU",
                user.as_str(),
                "/IT",
                "/RL",
                "LIMITED",
            ],
            cancel,
        )
        .await?;

        let result = self.run_task(&task, &files, cancel).await;
        self.delete_task(&task).await;

        if let Ok(output) = &result {
            info!(
                "Task {} ran {} with status {:?}",
                task, spec.program, output.status
            );
        }
        result
    }
}
