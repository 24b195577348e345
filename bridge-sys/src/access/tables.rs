// SPDX-License-Identifier: GPL-3.0-only

//! Host mapping tables: queries, parsers and mutation commands
//!
//! Each mechanism keeps its own table. `subst` lists substitutions,
//! `net use` lists network connections and `Get-PSDrive` lists every
//! filesystem drive PowerShell knows about, including local volumes.

use std::time::Duration;

use bridge_contracts::CommandSpec;
use bridge_types::{DriveLetter, MappingMechanism};
use serde::Deserialize;

use super::normalize::clean_target;
use crate::powershell;

/// Suffixes `net use` appends after the remote path
const NETWORK_PROVIDERS: [&str; 3] = [
    "Microsoft Windows Network",
    "Web Client Network",
    "Plan 9 Network Provider",
];

const PSDRIVE_QUERY: &str = "Get-PSDrive -PSProvider FileSystem | \
     Select-Object Name,Root,DisplayRoot | ConvertTo-Json -Compress";

/// One row of a mapping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub letter: DriveLetter,
    /// Target as the table printed it, decorations removed
    pub target: String,
    pub mechanism: MappingMechanism,
    /// A real volume rather than a mapping; never ours to remove
    pub local_volume: bool,
}

impl MappingEntry {
    fn mapped(letter: DriveLetter, target: &str, mechanism: MappingMechanism) -> Self {
        Self {
            letter,
            target: clean_target(target),
            mechanism,
            local_volume: false,
        }
    }
}

fn letter_token(token: &str) -> Option<DriveLetter> {
    let token = token.trim_end_matches('\\');
    let mut chars = token.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(letter), Some(':'), None) => DriveLetter::new(letter).ok(),
        _ => None,
    }
}

/// Lines like `Z:\: => UNC\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1`
pub fn parse_subst(output: &str) -> Vec<MappingEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (left, right) = line.split_once("=>")?;
            let letter = letter_token(left.trim().trim_end_matches(':'))?;
            let target = right.trim();
            (!target.is_empty())
                .then(|| MappingEntry::mapped(letter, target, MappingMechanism::Substitution))
        })
        .collect()
}

/// Rows of the `net use` listing; header, rule and footer lines are skipped
pub fn parse_net_use(output: &str) -> Vec<MappingEntry> {
    output
        .lines()
        .filter_map(|line| {
            // Status column may be empty, so find the first drive token.
            let mut rest = line.trim_start();
            let letter = loop {
                let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                let (token, tail) = rest.split_at(token_end);
                if token.is_empty() {
                    return None;
                }
                if let Some(letter) = letter_token(token) {
                    rest = tail;
                    break letter;
                }
                rest = tail.trim_start();
            };

            let mut remote = rest.trim();
            for provider in NETWORK_PROVIDERS {
                if let Some(stripped) = remote.strip_suffix(provider) {
                    remote = stripped.trim_end();
                }
            }
            remote
                .starts_with(r"\\")
                .then(|| MappingEntry::mapped(letter, remote, MappingMechanism::NetworkUse))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsDrive {
    name: String,
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    display_root: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

/// `ConvertTo-Json` output of the PSDrive query, object or array
pub fn parse_psdrive(output: &str) -> Result<Vec<MappingEntry>, serde_json::Error> {
    let trimmed = output.trim().trim_start_matches('\u{feff}');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let drives = serde_json::from_str::<OneOrMany<PsDrive>>(trimmed)?.into_vec();

    Ok(drives
        .into_iter()
        .filter_map(|drive| {
            let letter = letter_token(&format!("{}:", drive.name))?;
            let display = drive.display_root.filter(|root| !root.trim().is_empty());
            let root = drive.root.unwrap_or_default();
            let target = display.clone().unwrap_or(root);
            let mut entry =
                MappingEntry::mapped(letter, &target, MappingMechanism::FilesystemProvider);
            entry.local_volume = display.is_none() && !entry.target.starts_with(r"\\");
            Some(entry)
        })
        .collect())
}

/// Command listing the table of `mechanism`
pub fn query_command(mechanism: MappingMechanism, shell: &str, timeout: Duration) -> CommandSpec {
    match mechanism {
        MappingMechanism::Substitution => CommandSpec::new("subst").timeout(timeout),
        MappingMechanism::NetworkUse => CommandSpec::new("net").arg("use").timeout(timeout),
        MappingMechanism::FilesystemProvider | MappingMechanism::UserContextTask => {
            powershell::command(shell, PSDRIVE_QUERY, timeout)
        }
    }
}

pub fn parse_table(
    mechanism: MappingMechanism,
    output: &str,
) -> Result<Vec<MappingEntry>, serde_json::Error> {
    match mechanism {
        MappingMechanism::Substitution => Ok(parse_subst(output)),
        MappingMechanism::NetworkUse => Ok(parse_net_use(output)),
        MappingMechanism::FilesystemProvider | MappingMechanism::UserContextTask => {
            parse_psdrive(output)
        }
    }
}

pub fn map_command(
    mechanism: MappingMechanism,
    letter: DriveLetter,
    target: &str,
    shell: &str,
    timeout: Duration,
) -> CommandSpec {
    match mechanism {
        MappingMechanism::Substitution => CommandSpec::new("subst")
            .args([letter.device(), target.to_string()])
            .timeout(timeout),
        MappingMechanism::NetworkUse => CommandSpec::new("net")
            .args(["use".to_string(), letter.device(), target.to_string()])
            .arg("/persistent:no")
            .timeout(timeout),
        MappingMechanism::FilesystemProvider | MappingMechanism::UserContextTask => {
            let script = format!(
                "New-PSDrive -Name {} -PSProvider FileSystem -Root {} -Persist -Scope Global \
                 -ErrorAction Stop | Out-Null",
                letter.as_char(),
                powershell::quote(target)
            );
            powershell::command(shell, &script, timeout)
        }
    }
}

pub fn unmap_command(
    mechanism: MappingMechanism,
    letter: DriveLetter,
    shell: &str,
    timeout: Duration,
) -> CommandSpec {
    match mechanism {
        MappingMechanism::Substitution => CommandSpec::new("subst")
            .args([letter.device(), "/D".to_string()])
            .timeout(timeout),
        MappingMechanism::NetworkUse => CommandSpec::new("net")
            .args(["use".to_string(), letter.device()])
            .args(["/delete", "/y"])
            .timeout(timeout),
        MappingMechanism::FilesystemProvider | MappingMechanism::UserContextTask => {
            let script = format!(
                "Remove-PSDrive -Name {} -Force -ErrorAction Stop",
                letter.as_char()
            );
            powershell::command(shell, &script, timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn z() -> DriveLetter {
        DriveLetter::new('Z').unwrap()
    }

    #[test]
    fn parses_subst_listing() {
        let output = "Y:\\: => C:\\Data\\Games\r\nZ:\\: => UNC\\wsl$\\Ubuntu\\mnt\\wsl\\PHYSICALDRIVE2p1\r\n";
        let entries = parse_subst(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target, r"C:\Data\Games");
        assert_eq!(entries[1].letter, z());
        assert_eq!(entries[1].target, r"\\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1");
        assert!(parse_subst("").is_empty());
    }

    #[test]
    fn parses_net_use_listing_with_and_without_status() {
        let output = "New connections will not be remembered.\r\n\r\n\
            Status       Local     Remote                    Network\r\n\
            -------------------------------------------------------------------------------\r\n\
            OK           Z:        \\\\wsl$\\Ubuntu\\mnt     Microsoft Windows Network\r\n\
            Unavailable  Y:        \\\\nas\\media files      Microsoft Windows Network\r\n\
                         X:        \\\\nas\\backup           Web Client Network\r\n\
            The command completed successfully.\r\n";

        let entries = parse_net_use(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].letter, z());
        assert_eq!(entries[0].target, r"\\wsl$\Ubuntu\mnt");
        assert_eq!(entries[1].target, r"\\nas\media files");
        assert_eq!(entries[2].target, r"\\nas\backup");
        assert!(entries.iter().all(|e| e.mechanism == MappingMechanism::NetworkUse));
    }

    #[test]
    fn parses_psdrive_json_single_object_and_array() {
        let single = r#"{"Name":"Z","Root":"Z:\\","DisplayRoot":"\\\\wsl$\\Ubuntu\\mnt"}"#;
        let entries = parse_psdrive(single).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, r"\\wsl$\Ubuntu\mnt");
        assert!(!entries[0].local_volume);

        let many = r#"[{"Name":"C","Root":"C:\\","DisplayRoot":null},
                       {"Name":"Temp","Root":"C:\\Temp","DisplayRoot":null},
                       {"Name":"Y","Root":"\\\\nas\\media","DisplayRoot":""}]"#;
        let entries = parse_psdrive(many).unwrap();
        assert_eq!(entries.len(), 2, "named non-letter drives are skipped");
        assert!(entries[0].local_volume);
        assert_eq!(entries[1].target, r"\\nas\media");
        assert!(!entries[1].local_volume);

        assert!(parse_psdrive("  ").unwrap().is_empty());
        assert!(parse_psdrive("not json").is_err());
    }

    #[test]
    fn builds_mapping_commands() {
        let timeout = Duration::from_secs(5);
        let target = r"\\wsl$\Ubuntu\mnt";
        assert_eq!(
            map_command(MappingMechanism::Substitution, z(), target, "pwsh", timeout).render(),
            r"subst Z: \\wsl$\Ubuntu\mnt"
        );
        assert_eq!(
            map_command(MappingMechanism::NetworkUse, z(), target, "pwsh", timeout).render(),
            r"net use Z: \\wsl$\Ubuntu\mnt /persistent:no"
        );
        let psdrive = map_command(MappingMechanism::FilesystemProvider, z(), target, "pwsh", timeout);
        assert_eq!(psdrive.program, "pwsh");
        assert!(psdrive.args.last().unwrap().contains(r"-Root '\\wsl$\Ubuntu\mnt' -Persist"));

        assert_eq!(
            unmap_command(MappingMechanism::NetworkUse, z(), "pwsh", timeout).render(),
            "net use Z: /delete /y"
        );
        assert_eq!(
            unmap_command(MappingMechanism::Substitution, z(), "pwsh", timeout).render(),
            "subst Z: /D"
        );
    }
}
