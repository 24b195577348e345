// SPDX-License-Identifier: GPL-3.0-only

//! Disk inventory models
//!
//! Read-only view of the host's physical disks as reported by the inventory
//! collaborator. The orchestrator only needs enough to refuse system disks.

use serde::{Deserialize, Serialize};

/// Partition on a candidate disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCandidate {
    /// 1-based partition number
    pub number: u32,

    /// Size in bytes
    pub size: u64,

    /// Partition type as reported by the host (GPT/MBR type name)
    #[serde(default)]
    pub kind: Option<String>,
}

/// Physical disk that may be passed through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCandidate {
    /// Host disk number (`\\.\PHYSICALDRIVE<n>`)
    pub index: u32,

    pub friendly_name: String,

    /// Total size in bytes
    pub size: u64,

    pub is_boot: bool,

    pub is_system: bool,

    #[serde(default)]
    pub partitions: Vec<PartitionCandidate>,
}

impl DiskCandidate {
    /// Disks hosting the running OS must never be handed to the subsystem
    pub fn is_protected(&self) -> bool {
        self.is_boot || self.is_system
    }

    pub fn has_partition(&self, number: u32) -> bool {
        self.partitions.iter().any(|p| p.number == number)
    }

    pub fn device_path(&self) -> String {
        format!(r"\\.\PHYSICALDRIVE{}", self.index)
    }
}
