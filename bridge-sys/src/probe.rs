// SPDX-License-Identifier: GPL-3.0-only

//! Path reachability probes

use std::time::Duration;

use async_trait::async_trait;
use bridge_contracts::PathProbe;

/// Probes paths through the host filesystem API
///
/// Network paths can hang for a long time when the far side is gone, so
/// every probe is capped.
#[derive(Debug, Clone)]
pub struct FsPathProbe {
    timeout: Duration,
}

impl FsPathProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for FsPathProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PathProbe for FsPathProbe {
    async fn exists(&self, path: &str) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, tokio::fs::metadata(path)).await,
            Ok(Ok(_))
        )
    }

    async fn is_browsable(&self, path: &str) -> bool {
        let listing = async {
            let mut entries = tokio::fs::read_dir(path).await?;
            entries.next_entry().await.map(|_| ())
        };
        matches!(tokio::time::timeout(self.timeout, listing).await, Ok(Ok(())))
    }
}

/// Single probe bounded by `timeout`, whatever the probe's own limits
pub async fn probe_within(probe: &dyn PathProbe, path: &str, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, probe.exists(path))
        .await
        .unwrap_or(false)
}
