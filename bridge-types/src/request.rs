// SPDX-License-Identifier: GPL-3.0-only

//! Mount request models

use serde::{Deserialize, Serialize};

/// Filesystem type requested for a mount
///
/// `Auto` asks the subsystem to probe the partition itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemType {
    #[default]
    Auto,
    Ext4,
    Ext3,
    Ext2,
    Btrfs,
    Xfs,
    F2fs,
    Vfat,
    Exfat,
    Ntfs,
}

impl FilesystemType {
    pub const ALL: [FilesystemType; 10] = [
        FilesystemType::Auto,
        FilesystemType::Ext4,
        FilesystemType::Ext3,
        FilesystemType::Ext2,
        FilesystemType::Btrfs,
        FilesystemType::Xfs,
        FilesystemType::F2fs,
        FilesystemType::Vfat,
        FilesystemType::Exfat,
        FilesystemType::Ntfs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilesystemType::Auto => "auto",
            FilesystemType::Ext4 => "ext4",
            FilesystemType::Ext3 => "ext3",
            FilesystemType::Ext2 => "ext2",
            FilesystemType::Btrfs => "btrfs",
            FilesystemType::Xfs => "xfs",
            FilesystemType::F2fs => "f2fs",
            FilesystemType::Vfat => "vfat",
            FilesystemType::Exfat => "exfat",
            FilesystemType::Ntfs => "ntfs",
        }
    }

    pub fn is_auto(self) -> bool {
        self == FilesystemType::Auto
    }
}

impl std::fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FilesystemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        FilesystemType::ALL
            .into_iter()
            .find(|fs| fs.as_str() == wanted)
            .ok_or_else(|| format!("Unknown filesystem type: {}", s))
    }
}

/// How the mounted partition is exposed on the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Legacy drive letter (`Z:`)
    #[default]
    DriveLetter,
    /// Network-location style access through the subsystem namespace path
    Namespace,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::DriveLetter => write!(f, "drive_letter"),
            AccessMode::Namespace => write!(f, "namespace"),
        }
    }
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "drive_letter" | "letter" | "drive" => Ok(AccessMode::DriveLetter),
            "namespace" | "network" => Ok(AccessMode::Namespace),
            _ => Err(format!("Invalid access mode: {}", s)),
        }
    }
}

/// A single host drive letter, always stored upper-case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriveLetter(char);

impl DriveLetter {
    pub fn new(letter: char) -> Result<Self, String> {
        let upper = letter.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Ok(Self(upper))
        } else {
            Err(format!("Invalid drive letter: {}", letter))
        }
    }

    pub fn as_char(self) -> char {
        self.0
    }

    /// Device form used by mapping tools, e.g. `Z:`
    pub fn device(self) -> String {
        format!("{}:", self.0)
    }

    /// Letters reserved for floppy and system volumes
    pub fn is_reserved(self) -> bool {
        matches!(self.0, 'A' | 'B' | 'C')
    }
}

impl std::fmt::Display for DriveLetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.0)
    }
}

impl std::str::FromStr for DriveLetter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('\\').trim_end_matches(':');
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => DriveLetter::new(letter),
            _ => Err(format!("Invalid drive letter: {}", s)),
        }
    }
}

impl TryFrom<String> for DriveLetter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DriveLetter> for String {
    fn from(letter: DriveLetter) -> Self {
        letter.0.to_string()
    }
}

/// Identity of a mounted partition: unique per (disk, partition) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MountIdentity {
    pub disk_index: u32,
    pub partition: u32,
}

impl MountIdentity {
    pub fn new(disk_index: u32, partition: u32) -> Self {
        Self {
            disk_index,
            partition,
        }
    }
}

impl std::fmt::Display for MountIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "disk{}p{}", self.disk_index, self.partition)
    }
}

/// Caller input for a mount run
///
/// Indices are signed because they arrive unchecked from callers; the
/// orchestrator rejects negative and zero values before acting on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub disk_index: i64,
    pub partition: i64,
    #[serde(default)]
    pub filesystem: FilesystemType,
    #[serde(default)]
    pub distro: Option<String>,
    #[serde(default)]
    pub access_mode: Option<AccessMode>,
    #[serde(default)]
    pub drive_letter: Option<DriveLetter>,
}

impl MountRequest {
    pub fn new(disk_index: i64, partition: i64, filesystem: FilesystemType) -> Self {
        Self {
            disk_index,
            partition,
            filesystem,
            distro: None,
            access_mode: None,
            drive_letter: None,
        }
    }

    pub fn with_distro(mut self, distro: impl Into<String>) -> Self {
        self.distro = Some(distro.into());
        self
    }

    pub fn with_drive_letter(mut self, letter: DriveLetter) -> Self {
        self.drive_letter = Some(letter);
        self
    }

    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = Some(mode);
        self
    }

    /// Identity for this request, if both indices are in range
    pub fn identity(&self) -> Option<MountIdentity> {
        let disk_index = u32::try_from(self.disk_index).ok()?;
        let partition = u32::try_from(self.partition).ok()?;
        (partition >= 1).then_some(MountIdentity::new(disk_index, partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_type_parses_case_insensitively() {
        assert_eq!("EXT4".parse::<FilesystemType>(), Ok(FilesystemType::Ext4));
        assert_eq!(" auto ".parse::<FilesystemType>(), Ok(FilesystemType::Auto));
        assert!("zfs".parse::<FilesystemType>().is_err());
    }

    #[test]
    fn drive_letter_accepts_common_spellings() {
        let z: DriveLetter = "z:".parse().unwrap();
        assert_eq!(z.as_char(), 'Z');
        assert_eq!("Z:\\".parse::<DriveLetter>().unwrap(), z);
        assert_eq!(z.device(), "Z:");
        assert!("ZZ".parse::<DriveLetter>().is_err());
        assert!("1".parse::<DriveLetter>().is_err());
        assert!(DriveLetter::new('c').unwrap().is_reserved());
    }

    #[test]
    fn identity_requires_non_negative_disk_and_positive_partition() {
        assert_eq!(
            MountRequest::new(2, 1, FilesystemType::Auto).identity(),
            Some(MountIdentity::new(2, 1))
        );
        assert_eq!(MountRequest::new(-1, 1, FilesystemType::Auto).identity(), None);
        assert_eq!(MountRequest::new(1, 0, FilesystemType::Auto).identity(), None);
    }

    #[test]
    fn drive_letter_serializes_as_plain_letter() {
        let json = serde_json::to_string(&DriveLetter::new('m').unwrap()).unwrap();
        assert_eq!(json, "\"M\"");
        let parsed: DriveLetter = serde_json::from_str("\"q\"").unwrap();
        assert_eq!(parsed.as_char(), 'Q');
    }
}
