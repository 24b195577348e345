// SPDX-License-Identifier: GPL-3.0-only

//! Detection of the current process's privilege level

use bridge_contracts::CommandRunner;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[cfg(windows)]
const ADMIN_CHECK: &str = "([Security.Principal.WindowsPrincipal][Security.Principal.WindowsIdentity]::GetCurrent()).IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)";

/// Whether this process runs with administrative rights
///
/// Errors count as "not elevated": the direct mapping path is the safe
/// default because it never schedules tasks under another principal.
#[cfg(windows)]
pub async fn is_elevated(
    runner: &dyn CommandRunner,
    shell: &str,
    cancel: &CancellationToken,
) -> bool {
    let spec = crate::powershell::command(shell, ADMIN_CHECK, std::time::Duration::from_secs(15));
    match runner.run(&spec, cancel).await {
        Ok(output) if output.success() => output.stdout.trim().eq_ignore_ascii_case("true"),
        Ok(output) => {
            warn!("Elevation check failed: {}", output.error_text());
            false
        }
        Err(e) => {
            warn!("Elevation check failed: {}", e);
            false
        }
    }
}

#[cfg(unix)]
pub async fn is_elevated(
    _runner: &dyn CommandRunner,
    _shell: &str,
    _cancel: &CancellationToken,
) -> bool {
    let elevated = unsafe { libc::geteuid() } == 0;
    if elevated {
        warn!("Running as root; host mappings will be created through the user-context runner");
    }
    elevated
}
