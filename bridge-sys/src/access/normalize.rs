// SPDX-License-Identifier: GPL-3.0-only

//! Canonical form for mapping targets
//!
//! `subst`, `net use` and PowerShell each print the same target differently
//! (`UNC\wsl$\...`, `\\wsl.localhost\...`, `Microsoft.PowerShell.Core\FileSystem::\\...`).
//! Every equality check between targets goes through [`normalize_target`].

const PROVIDER_PREFIX: &str = r"microsoft.powershell.core\filesystem::";
const NAMESPACE_HOST: &str = r"\\wsl$\";
const NAMESPACE_ALIAS: &str = r"\\wsl.localhost\";

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

/// Target with decorations removed but original casing kept
///
/// Suitable for passing back to mapping commands.
pub fn clean_target(raw: &str) -> String {
    let mut value = raw.trim().trim_matches('"').trim().replace('/', "\\");

    if let Some(rest) = strip_prefix_ignore_case(&value, PROVIDER_PREFIX) {
        value = rest.to_string();
    }
    for prefix in [r"\\?\UNC\", r"\??\UNC\"] {
        if let Some(rest) = strip_prefix_ignore_case(&value, prefix) {
            value = format!(r"\\{}", rest);
        }
    }
    for prefix in [r"\\?\", r"\??\"] {
        if let Some(rest) = strip_prefix_ignore_case(&value, prefix) {
            value = rest.to_string();
        }
    }
    // `subst` prints network targets as `UNC\server\share`.
    if let Some(rest) = strip_prefix_ignore_case(&value, r"UNC\") {
        value = format!(r"\\{}", rest);
    }

    let is_unc = value.starts_with(r"\\");
    let mut collapsed = String::with_capacity(value.len());
    let mut previous_sep = false;
    for c in value.trim_start_matches('\\').chars() {
        if c == '\\' {
            if !previous_sep {
                collapsed.push(c);
            }
            previous_sep = true;
        } else {
            collapsed.push(c);
            previous_sep = false;
        }
    }

    let mut cleaned = if is_unc {
        format!(r"\\{}", collapsed)
    } else {
        collapsed
    };
    while cleaned.ends_with('\\') && cleaned.len() > 2 {
        cleaned.pop();
    }
    cleaned
}

/// Comparison key for a mapping target
pub fn normalize_target(raw: &str) -> String {
    let cleaned = clean_target(raw).to_ascii_lowercase();
    match strip_prefix_ignore_case(&cleaned, NAMESPACE_ALIAS) {
        Some(rest) => format!("{}{}", NAMESPACE_HOST, rest),
        None => cleaned,
    }
}

pub fn same_target(a: &str, b: &str) -> bool {
    normalize_target(a) == normalize_target(b)
}

/// Whether a normalized target lives in the subsystem namespace
pub fn is_namespace_path(normalized: &str) -> bool {
    normalized.starts_with(NAMESPACE_HOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mechanism_spelling_normalizes_to_one_key() {
        let expected = r"\\wsl$\ubuntu\mnt\wsl\physicaldrive2p1";
        for raw in [
            r"\\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1",
            r" \\wsl.localhost\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1\ ",
            r"UNC\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1",
            r"\\?\UNC\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1",
            r"Microsoft.PowerShell.Core\FileSystem::\\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1",
            "//wsl$/Ubuntu//mnt/wsl/PHYSICALDRIVE2p1/",
            "\"\\\\wsl$\\Ubuntu\\mnt\\wsl\\PHYSICALDRIVE2p1\"",
        ] {
            assert_eq!(normalize_target(raw), expected, "input {raw:?}");
        }
    }

    #[test]
    fn clean_target_keeps_case_and_local_paths() {
        assert_eq!(clean_target(r"\\?\C:\Data\\Games\"), r"C:\Data\Games");
        assert_eq!(clean_target(r"C:\"), "C:");
        assert_eq!(
            clean_target(r"\\Server\Share\"),
            r"\\Server\Share"
        );
    }

    #[test]
    fn different_shares_stay_different() {
        assert!(!same_target(r"\\wsl$\Ubuntu\a", r"\\wsl$\Ubuntu\b"));
        assert!(same_target(r"\\SERVER\share", r"\\server\SHARE\"));
    }

    #[test]
    fn namespace_detection_uses_normalized_form() {
        assert!(is_namespace_path(&normalize_target(r"\\wsl.localhost\Debian")));
        assert!(!is_namespace_path(&normalize_target(r"\\nas\media")));
    }
}
