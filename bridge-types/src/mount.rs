// SPDX-License-Identifier: GPL-3.0-only

//! Persisted mount records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DriveLetter, MountIdentity};

/// Host access point a mount is exposed through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AccessPoint {
    DriveLetter(DriveLetter),
    /// No letter; the namespace path itself is the access point
    Namespace,
}

impl AccessPoint {
    pub fn drive_letter(&self) -> Option<DriveLetter> {
        match self {
            AccessPoint::DriveLetter(letter) => Some(*letter),
            AccessPoint::Namespace => None,
        }
    }
}

impl std::fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessPoint::DriveLetter(letter) => write!(f, "{}", letter),
            AccessPoint::Namespace => write!(f, "namespace"),
        }
    }
}

/// A partition currently mounted through the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMount {
    pub identity: MountIdentity,
    pub access: AccessPoint,
    pub distro: String,
    /// Path inside the subsystem, e.g. `/mnt/wsl/PHYSICALDRIVE2p1`
    pub linux_path: String,
    /// Host-reachable network path
    pub unc_path: String,
    pub mounted_at: DateTime<Utc>,
    pub last_verified: Option<DateTime<Utc>>,
    pub verified: bool,
}

impl ActiveMount {
    pub fn new(
        identity: MountIdentity,
        access: AccessPoint,
        distro: impl Into<String>,
        linux_path: impl Into<String>,
        unc_path: impl Into<String>,
        verified: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            identity,
            access,
            distro: distro.into(),
            linux_path: linux_path.into(),
            unc_path: unc_path.into(),
            mounted_at: now,
            last_verified: verified.then_some(now),
            verified,
        }
    }

    /// Record the result of a fresh reachability probe
    pub fn mark_verified(&mut self, reachable: bool) {
        self.verified = reachable;
        if reachable {
            self.last_verified = Some(Utc::now());
        }
    }

    /// Path users should open: the drive root when a letter is assigned
    pub fn browse_path(&self) -> String {
        match self.access.drive_letter() {
            Some(letter) => format!("{}\\", letter),
            None => self.unc_path.clone(),
        }
    }
}
