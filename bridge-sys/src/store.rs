// SPDX-License-Identifier: GPL-3.0-only

//! File-backed persistence of active mounts
//!
//! The whole collection lives in one pretty-printed JSON document. Writes
//! go to a sibling temp file which is then renamed over the original, so a
//! crash mid-write leaves the previous state intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bridge_contracts::{BridgeError, BridgeErrorKind, MountStore};
use bridge_types::{ActiveMount, MountIdentity};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("corrupt mount store {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("mount store {path:?} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
}

impl From<StoreError> for BridgeError {
    fn from(error: StoreError) -> Self {
        let kind = match &error {
            StoreError::Io { .. } => BridgeErrorKind::Unavailable,
            StoreError::Corrupt { .. } | StoreError::UnsupportedVersion { .. } => {
                BridgeErrorKind::Internal
            }
        };
        BridgeError::new(kind, error.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    mounts: Vec<ActiveMount>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            mounts: Vec::new(),
        }
    }
}

/// [`MountStore`] persisted as a JSON file
pub struct JsonMountStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonMountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreFile, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No mount store at {:?}, starting empty", self.path);
                return Ok(StoreFile::default());
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(StoreFile::default());
        }

        let file: StoreFile = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if file.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: file.version,
            });
        }
        Ok(file)
    }

    async fn save(&self, file: &StoreFile) -> Result<(), StoreError> {
        let io_error = |path: &Path, e: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error(dir, e))?;
        }

        let content = serde_json::to_string_pretty(file).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, content)
            .await
            .map_err(|e| io_error(&staging, e))?;
        if let Err(e) = tokio::fs::rename(&staging, &self.path).await {
            warn!("Failed to replace {:?}: {}", self.path, e);
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(&self.path, e));
        }
        debug!("Saved {} mount record(s) to {:?}", file.mounts.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl MountStore for JsonMountStore {
    async fn list(&self) -> Result<Vec<ActiveMount>, BridgeError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.mounts)
    }

    async fn upsert(&self, mount: ActiveMount) -> Result<(), BridgeError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        match file.mounts.iter_mut().find(|m| m.identity == mount.identity) {
            Some(existing) => *existing = mount,
            None => file.mounts.push(mount),
        }
        self.save(&file).await?;
        Ok(())
    }

    async fn remove(&self, identity: MountIdentity) -> Result<bool, BridgeError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let before = file.mounts.len();
        file.mounts.retain(|m| m.identity != identity);
        if file.mounts.len() == before {
            return Ok(false);
        }
        self.save(&file).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_types::{AccessPoint, DriveLetter};

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("mount-bridge-store-{}", uuid::Uuid::new_v4()))
            .join("mounts.json")
    }

    fn record(disk: u32, partition: u32, letter: char) -> ActiveMount {
        ActiveMount::new(
            MountIdentity::new(disk, partition),
            AccessPoint::DriveLetter(DriveLetter::new(letter).unwrap()),
            "Ubuntu",
            format!("/mnt/wsl/PHYSICALDRIVE{}p{}", disk, partition),
            format!(r"\\wsl$\Ubuntu\mnt\wsl\PHYSICALDRIVE{}p{}", disk, partition),
            true,
        )
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_store() {
        let path = scratch_path();
        let store = JsonMountStore::new(&path);
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.remove(MountIdentity::new(1, 1)).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn upsert_replaces_by_identity_and_survives_reopen() {
        let path = scratch_path();
        let store = JsonMountStore::new(&path);

        store.upsert(record(2, 1, 'Z')).await.unwrap();
        store.upsert(record(3, 1, 'Y')).await.unwrap();
        store.upsert(record(2, 1, 'X')).await.unwrap();

        let reopened = JsonMountStore::new(&path);
        let mounts = reopened.list().await.unwrap();
        assert_eq!(mounts.len(), 2);
        let replaced = reopened.get(MountIdentity::new(2, 1)).await.unwrap().unwrap();
        assert_eq!(replaced.access.drive_letter(), Some(DriveLetter::new('X').unwrap()));
        cleanup(&path);
    }

    #[tokio::test]
    async fn remove_reports_whether_a_record_went_away() {
        let path = scratch_path();
        let store = JsonMountStore::new(&path);
        store.upsert(record(2, 1, 'Z')).await.unwrap();

        assert!(store.remove(MountIdentity::new(2, 1)).await.unwrap());
        assert!(!store.remove(MountIdentity::new(2, 1)).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());

        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        assert!(!PathBuf::from(staging).exists());
        cleanup(&path);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_an_empty_store() {
        let path = scratch_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonMountStore::new(&path).list().await.unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::Internal);
        assert!(err.message.contains("corrupt"));
        cleanup(&path);
    }
}
