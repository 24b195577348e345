// SPDX-License-Identifier: GPL-3.0-only

//! PowerShell command construction helpers

use std::path::Path;
use std::time::Duration;

use bridge_contracts::CommandSpec;
use which::which;

pub const DEFAULT_SHELL: &str = "powershell.exe";

/// Locate a PowerShell binary, preferring Windows PowerShell
pub fn find_shell() -> String {
    ["powershell.exe", "powershell", "pwsh.exe", "pwsh"]
        .into_iter()
        .find(|candidate| which(candidate).is_ok())
        .unwrap_or(DEFAULT_SHELL)
        .to_string()
}

/// Single-quoted PowerShell string literal
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Inline PowerShell array literal of quoted strings
pub fn quote_array<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Vec<String> = values.into_iter().map(|v| quote(v.as_ref())).collect();
    format!("@({})", quoted.join(","))
}

/// `shell -NoProfile -NonInteractive -Command <script>`
pub fn command(shell: &str, script: &str, timeout: Duration) -> CommandSpec {
    CommandSpec::new(shell)
        .args(["-NoProfile", "-NonInteractive", "-Command"])
        .arg(script)
        .timeout(timeout)
}

/// `shell -NoProfile -NonInteractive -ExecutionPolicy Bypass -File <file> <args>`
pub fn file_args(file: &Path, args: &[String]) -> Vec<String> {
    let mut out = vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-File".to_string(),
        file.display().to_string(),
    ];
    out.extend_from_slice(args);
    out
}
