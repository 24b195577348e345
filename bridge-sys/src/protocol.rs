// SPDX-License-Identifier: GPL-3.0-only

//! Result protocol spoken by the operation scripts
//!
//! Scripts print (and, when elevated, also write to their result file) a
//! block of `KEY=VALUE` lines:
//!
//! ```text
//! STATUS=OK
//! PROTOCOL=1
//! DISTRO=Ubuntu
//! LINUX_PATH=/mnt/wsl/PHYSICALDRIVE2p1
//! UNC_PATH=\\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1
//! ```
//!
//! The first meaningful line is always `STATUS=`. Unknown keys are kept but
//! ignored so newer scripts can add fields. Lines without `=` are noise
//! (shell banners, progress output) and are skipped.

use std::collections::BTreeMap;

use crate::error::ProtocolError;

pub const PROTOCOL_VERSION: u32 = 1;

pub const KEY_STATUS: &str = "STATUS";
pub const KEY_PROTOCOL: &str = "PROTOCOL";
pub const KEY_ERROR: &str = "ERROR";
pub const KEY_ERROR_CODE: &str = "ERROR_CODE";
pub const KEY_DISTRO: &str = "DISTRO";
pub const KEY_LINUX_PATH: &str = "LINUX_PATH";
pub const KEY_UNC_PATH: &str = "UNC_PATH";
pub const KEY_ALREADY_MOUNTED: &str = "ALREADY_MOUNTED";

/// Decoded key/value pairs, keys upper-cased
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(BTreeMap<String, String>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into().to_ascii_uppercase(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, key: &'static str) -> Result<&str, ProtocolError> {
        self.get(key).ok_or(ProtocolError::MissingKey(key))
    }

    /// Boolean flag; absent means `false`
    pub fn flag(&self, key: &'static str) -> Result<bool, ProtocolError> {
        match self.get(key) {
            None => Ok(false),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ProtocolError::InvalidValue {
                    key,
                    value: value.to_string(),
                }),
            },
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Script-reported failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub message: String,
    pub fields: Fields,
}

impl FailureReport {
    /// Optional machine-readable code (`UNSUPPORTED`, `ELEVATION_DENIED`, ...)
    pub fn code(&self) -> Option<&str> {
        self.fields.get(KEY_ERROR_CODE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Success(Fields),
    Failure(FailureReport),
}

impl ScriptReply {
    pub fn is_success(&self) -> bool {
        matches!(self, ScriptReply::Success(_))
    }
}

fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\u{feff}' && *c != '\0')
        .collect()
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim()))
}

/// Decode script output into a tagged reply
pub fn decode(raw: &str) -> Result<ScriptReply, ProtocolError> {
    let text = clean_text(raw);
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

    let first = lines.next().ok_or(ProtocolError::Empty)?;
    let status = match split_line(first) {
        Some((key, value)) if key.eq_ignore_ascii_case(KEY_STATUS) => value.to_ascii_uppercase(),
        _ => return Err(ProtocolError::MissingStatus(first.to_string())),
    };

    let mut fields = Fields::new();
    for line in lines {
        if let Some((key, value)) = split_line(line) {
            fields.insert(key, value);
        }
    }

    if let Some(version) = fields.get(KEY_PROTOCOL) {
        match version.parse::<u32>() {
            Ok(v) if v >= 1 && v <= PROTOCOL_VERSION => {}
            _ => return Err(ProtocolError::UnsupportedVersion(version.to_string())),
        }
    }

    match status.as_str() {
        "OK" => Ok(ScriptReply::Success(fields)),
        "ERROR" => {
            let message = fields
                .get(KEY_ERROR)
                .unwrap_or("script reported STATUS=ERROR without a message")
                .to_string();
            Ok(ScriptReply::Failure(FailureReport { message, fields }))
        }
        _ => Err(ProtocolError::UnknownStatus(status)),
    }
}

/// Encode a reply in the same line format scripts emit
pub fn encode(reply: &ScriptReply) -> String {
    let mut out = String::new();
    let fields = match reply {
        ScriptReply::Success(fields) => {
            out.push_str("STATUS=OK\n");
            fields
        }
        ScriptReply::Failure(report) => {
            out.push_str("STATUS=ERROR\n");
            out.push_str(&format!("{}={}\n", KEY_ERROR, single_line(&report.message)));
            &report.fields
        }
    };

    if fields.get(KEY_PROTOCOL).is_none() {
        out.push_str(&format!("{}={}\n", KEY_PROTOCOL, PROTOCOL_VERSION));
    }
    for (key, value) in fields.iter() {
        if key == KEY_STATUS || (key == KEY_ERROR && !reply.is_success()) {
            continue;
        }
        out.push_str(&format!("{}={}\n", key, single_line(value)));
    }
    out
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Successful mount reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountReply {
    pub distro: String,
    pub linux_path: String,
    pub unc_path: String,
    pub already_mounted: bool,
}

impl TryFrom<&Fields> for MountReply {
    type Error = ProtocolError;

    fn try_from(fields: &Fields) -> Result<Self, Self::Error> {
        Ok(Self {
            distro: fields.require(KEY_DISTRO)?.to_string(),
            linux_path: fields.require(KEY_LINUX_PATH)?.to_string(),
            unc_path: fields.require(KEY_UNC_PATH)?.to_string(),
            already_mounted: fields.flag(KEY_ALREADY_MOUNTED)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mount_success_and_ignores_unknown_keys() {
        let raw = "\u{feff}\r\nSTATUS=OK\r\nPROTOCOL=1\r\nDISTRO=Ubuntu\r\n\
                   LINUX_PATH=/mnt/wsl/PHYSICALDRIVE2p1\r\n\
                   UNC_PATH=\\\\wsl$\\Ubuntu\\mnt\\wsl\\PHYSICALDRIVE2p1\r\n\
                   FUTURE_FIELD=whatever\r\n";

        let ScriptReply::Success(fields) = decode(raw).unwrap() else {
            panic!("expected success");
        };
        let reply = MountReply::try_from(&fields).unwrap();
        assert_eq!(reply.distro, "Ubuntu");
        assert_eq!(reply.linux_path, "/mnt/wsl/PHYSICALDRIVE2p1");
        assert_eq!(reply.unc_path, r"\\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE2p1");
        assert!(!reply.already_mounted);
    }

    #[test]
    fn missing_required_key_on_ok_is_a_protocol_error() {
        let ScriptReply::Success(fields) = decode("STATUS=OK\nDISTRO=Ubuntu\n").unwrap() else {
            panic!("expected success");
        };
        assert_eq!(
            MountReply::try_from(&fields),
            Err(ProtocolError::MissingKey(KEY_LINUX_PATH))
        );
    }

    #[test]
    fn status_must_come_first() {
        assert_eq!(decode(""), Err(ProtocolError::Empty));
        assert!(matches!(
            decode("DISTRO=Ubuntu\nSTATUS=OK\n"),
            Err(ProtocolError::MissingStatus(_))
        ));
        assert_eq!(
            decode("STATUS=MAYBE\n"),
            Err(ProtocolError::UnknownStatus("MAYBE".to_string()))
        );
    }

    #[test]
    fn error_reply_keeps_message_with_equals_signs_and_code() {
        let reply = decode(
            "STATUS=ERROR\nERROR=Wsl/Service/AttachDisk/0x80070057 a=b\nERROR_CODE=UNSUPPORTED\n",
        )
        .unwrap();
        let ScriptReply::Failure(report) = reply else {
            panic!("expected failure");
        };
        assert_eq!(report.message, "Wsl/Service/AttachDisk/0x80070057 a=b");
        assert_eq!(report.code(), Some("UNSUPPORTED"));
    }

    #[test]
    fn error_without_message_gets_placeholder() {
        let ScriptReply::Failure(report) = decode("STATUS=ERROR").unwrap() else {
            panic!("expected failure");
        };
        assert!(report.message.contains("without a message"));
    }

    #[test]
    fn rejects_newer_protocol_versions() {
        assert_eq!(
            decode("STATUS=OK\nPROTOCOL=9\n"),
            Err(ProtocolError::UnsupportedVersion("9".to_string()))
        );
    }

    #[test]
    fn noise_lines_and_utf16_nuls_are_skipped() {
        let raw = "S\0T\0A\0T\0U\0S\0=\0O\0K\0\nWARNING: something happened\nDISTRO=Debian\n";
        let ScriptReply::Success(fields) = decode(raw).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(fields.get(KEY_DISTRO), Some("Debian"));
        assert_eq!(fields.iter().count(), 1);
    }

    #[test]
    fn invalid_flag_value_is_rejected() {
        let fields = Fields::new().with(KEY_ALREADY_MOUNTED, "perhaps");
        assert!(matches!(
            fields.flag(KEY_ALREADY_MOUNTED),
            Err(ProtocolError::InvalidValue { .. })
        ));
    }

    #[test]
    fn encoded_failure_decodes_to_the_same_report() {
        let original = ScriptReply::Failure(FailureReport {
            message: "mount failed\nline two".to_string(),
            fields: Fields::new().with(KEY_ERROR_CODE, "GENERIC"),
        });
        let text = encode(&original);
        assert!(text.starts_with("STATUS=ERROR\n"));

        let ScriptReply::Failure(report) = decode(&text).unwrap() else {
            panic!("expected failure");
        };
        assert_eq!(report.message, "mount failed line two");
        assert_eq!(report.code(), Some("GENERIC"));
    }
}
