// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeErrorKind {
    InvalidInput,
    NotFound,
    PermissionDenied,
    Conflict,
    Unsupported,
    Timeout,
    Unavailable,
    Cancelled,
    Internal,
}

impl BridgeErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::PermissionDenied => 403,
            Self::Conflict => 409,
            Self::Unsupported => 501,
            Self::Timeout => 504,
            Self::Unavailable => 503,
            Self::Cancelled => 499,
            Self::Internal => 500,
        }
    }
}

/// Error returned by collaborators (inventory, persistence, kernel log)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub message: String,
}

impl BridgeError {
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Unavailable, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Cancelled, message)
    }
}

/// Failure to run a subprocess or collect its result
///
/// A result-file timeout is deliberately distinct from a process that ran and
/// failed: the former says nothing about whether the operation happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} did not finish within {after:?}")]
    ProcessTimeout { program: String, after: Duration },

    #[error("elevation was refused: {0}")]
    ElevationDenied(String),

    #[error("elevated result file {path:?} did not appear within {after:?}")]
    ResultTimeout { path: PathBuf, after: Duration },

    #[error("failed to read result file {path:?}: {reason}")]
    ResultIo { path: PathBuf, reason: String },

    #[error("script not found: {0:?}")]
    ScriptMissing(PathBuf),

    #[error("operation cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ProcessTimeout { .. } | Self::ResultTimeout { .. })
    }
}

/// Failure of a run-as-user indirection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndirectionError {
    #[error("failed to schedule user-context task {task}: {reason}")]
    Schedule { task: String, reason: String },

    #[error("user-context task {task} produced no result within {after:?}")]
    Timeout { task: String, after: Duration },

    #[error("no interactive user session to run as")]
    NoInteractiveUser,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_error_roundtrips() {
        let error = BridgeError::new(BridgeErrorKind::Conflict, "already exists");
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: BridgeError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
    }

    #[test]
    fn error_kind_http_family_codes_are_stable() {
        assert_eq!(BridgeErrorKind::InvalidInput.code(), 400);
        assert_eq!(BridgeErrorKind::PermissionDenied.code(), 403);
        assert_eq!(BridgeErrorKind::Timeout.code(), 504);
        assert_eq!(BridgeErrorKind::Internal.code(), 500);
    }

    #[test]
    fn both_timeouts_are_reported_as_timeouts() {
        let process = GatewayError::ProcessTimeout {
            program: "wsl.exe".to_string(),
            after: Duration::from_secs(5),
        };
        let result = GatewayError::ResultTimeout {
            path: PathBuf::from("r.result"),
            after: Duration::from_secs(5),
        };
        assert!(process.is_timeout());
        assert!(result.is_timeout());
        assert!(!GatewayError::Cancelled.is_timeout());
    }
}
