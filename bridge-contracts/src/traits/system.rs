// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::BridgeError;

/// Single-shot path checks; retrying is the caller's business
#[async_trait]
pub trait PathProbe: Send + Sync {
    async fn exists(&self, path: &str) -> bool;

    /// Whether the directory at `path` can be listed
    async fn is_browsable(&self, path: &str) -> bool {
        self.exists(path).await
    }
}

/// Access to the subsystem's kernel ring buffer
#[async_trait]
pub trait KernelLog: Send + Sync {
    async fn tail(
        &self,
        distro: Option<&str>,
        lines: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, BridgeError>;
}
