// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use bridge_types::{ActiveMount, MountIdentity};

use crate::BridgeError;

/// Durable collection of [`ActiveMount`] records keyed by identity
#[async_trait]
pub trait MountStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ActiveMount>, BridgeError>;

    async fn get(&self, identity: MountIdentity) -> Result<Option<ActiveMount>, BridgeError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|mount| mount.identity == identity))
    }

    /// Insert or replace the record with the same identity
    async fn upsert(&self, mount: ActiveMount) -> Result<(), BridgeError>;

    /// Returns whether a record was removed
    async fn remove(&self, identity: MountIdentity) -> Result<bool, BridgeError>;
}
