// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use bridge_types::DiskCandidate;

use crate::BridgeError;

#[async_trait]
pub trait DiskInventory: Send + Sync {
    async fn list_disks(&self) -> Result<Vec<DiskCandidate>, BridgeError>;
}
