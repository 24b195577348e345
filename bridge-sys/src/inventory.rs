// SPDX-License-Identifier: GPL-3.0-only

//! Physical disk inventory through the Storage PowerShell module

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_contracts::{BridgeError, BridgeErrorKind, CommandRunner, DiskInventory};
use bridge_types::{DiskCandidate, PartitionCandidate};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::access::tables::OneOrMany;
use crate::powershell;

const INVENTORY_SCRIPT: &str = "$disks = Get-Disk | ForEach-Object { \
     $parts = @(Get-Partition -DiskNumber $_.Number -ErrorAction SilentlyContinue | \
        Select-Object PartitionNumber,Size,Type); \
     [pscustomobject]@{ Number = $_.Number; FriendlyName = $_.FriendlyName; Size = $_.Size; \
        IsBoot = $_.IsBoot; IsSystem = $_.IsSystem; Partitions = $parts } }; \
     ConvertTo-Json -InputObject @($disks) -Depth 4 -Compress";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPartition {
    partition_number: u32,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "Type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDisk {
    number: u32,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    is_boot: bool,
    #[serde(default)]
    is_system: bool,
    #[serde(default)]
    partitions: Option<OneOrMany<RawPartition>>,
}

impl From<RawDisk> for DiskCandidate {
    fn from(raw: RawDisk) -> Self {
        let mut partitions: Vec<PartitionCandidate> = raw
            .partitions
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|p| PartitionCandidate {
                number: p.partition_number,
                size: p.size,
                kind: p.kind.filter(|k| !k.is_empty()),
            })
            .collect();
        partitions.sort_by_key(|p| p.number);

        DiskCandidate {
            index: raw.number,
            friendly_name: raw.friendly_name.unwrap_or_default(),
            size: raw.size,
            is_boot: raw.is_boot,
            is_system: raw.is_system,
            partitions,
        }
    }
}

/// Parse the inventory script's JSON, a single disk object or an array
pub fn parse_inventory(json: &str) -> Result<Vec<DiskCandidate>, serde_json::Error> {
    let trimmed = json.trim().trim_start_matches('\u{feff}');
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let raw = serde_json::from_str::<OneOrMany<RawDisk>>(trimmed)?;
    let mut disks: Vec<DiskCandidate> = raw.into_vec().into_iter().map(Into::into).collect();
    disks.sort_by_key(|d| d.index);
    Ok(disks)
}

pub struct PowerShellDiskInventory {
    runner: Arc<dyn CommandRunner>,
    shell: String,
    timeout: Duration,
}

impl PowerShellDiskInventory {
    pub fn new(runner: Arc<dyn CommandRunner>, shell: impl Into<String>) -> Self {
        Self {
            runner,
            shell: shell.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl DiskInventory for PowerShellDiskInventory {
    async fn list_disks(&self) -> Result<Vec<DiskCandidate>, BridgeError> {
        let spec = powershell::command(&self.shell, INVENTORY_SCRIPT, self.timeout);
        let output = self
            .runner
            .run(&spec, &CancellationToken::new())
            .await
            .map_err(|e| BridgeError::unavailable(e.to_string()))?;

        if !output.success() {
            return Err(BridgeError::unavailable(format!(
                "disk inventory failed: {}",
                output.error_text()
            )));
        }

        let disks = parse_inventory(&output.stdout).map_err(|e| {
            BridgeError::new(
                BridgeErrorKind::Internal,
                format!("unreadable disk inventory: {}", e),
            )
        })?;
        debug!("Inventory lists {} disk(s)", disks.len());
        Ok(disks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disk_array_with_mixed_partition_shapes() {
        let json = r#"[
            {"Number":2,"FriendlyName":"USB SanDisk","Size":64023257088,"IsBoot":false,"IsSystem":false,
             "Partitions":{"PartitionNumber":1,"Size":64022208512,"Type":"Basic"}},
            {"Number":0,"FriendlyName":"NVMe Samsung","Size":1000204886016,"IsBoot":true,"IsSystem":true,
             "Partitions":[{"PartitionNumber":2,"Size":16777216,"Type":"Reserved"},
                           {"PartitionNumber":1,"Size":104857600,"Type":"System"}]},
            {"Number":1,"FriendlyName":null,"Size":0,"IsBoot":false,"IsSystem":false,"Partitions":null}
        ]"#;

        let disks = parse_inventory(json).unwrap();
        assert_eq!(disks.iter().map(|d| d.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(disks[0].is_protected());
        assert_eq!(disks[0].partitions[0].number, 1);
        assert!(disks[1].partitions.is_empty());
        assert!(disks[2].has_partition(1));
        assert_eq!(disks[2].partitions[0].kind.as_deref(), Some("Basic"));
    }

    #[test]
    fn parses_single_disk_object_and_empty_output() {
        let json = r#"{"Number":3,"FriendlyName":"External","Size":1,"IsBoot":false,"IsSystem":false}"#;
        let disks = parse_inventory(json).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].device_path(), r"\\.\PHYSICALDRIVE3");

        assert!(parse_inventory("").unwrap().is_empty());
        assert!(parse_inventory("null").unwrap().is_empty());
        assert!(parse_inventory("Get-Disk : Access denied").is_err());
    }
}
