// SPDX-License-Identifier: GPL-3.0-only

use bridge_types::{AccessMappingAttempt, DriveLetter, ErrorCategory, MappingMechanism};
use thiserror::Error;

/// Script output that does not follow the result protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("script produced no output")]
    Empty,

    #[error("expected STATUS=OK or STATUS=ERROR as first line, got {0:?}")]
    MissingStatus(String),

    #[error("unknown status value {0:?}")]
    UnknownStatus(String),

    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),

    #[error("missing required key {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Failure to expose a path at a drive letter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("{letter} is already mapped to {existing} ({mechanism})")]
    Conflict {
        letter: DriveLetter,
        existing: String,
        mechanism: MappingMechanism,
    },

    #[error("{target} was not reachable after {attempts} attempts")]
    Unreachable { target: String, attempts: u32 },

    #[error("every mapping mechanism failed for {letter}: {}", summarize(.attempts))]
    Exhausted {
        letter: DriveLetter,
        attempts: Vec<AccessMappingAttempt>,
    },

    #[error("user-context task did not report back: {0}")]
    IndirectionTimeout(String),

    #[error("user-context task failed: {0}")]
    Indirection(String),

    #[error("failed to remove {letter} ({mechanism}): {reason}")]
    RemovalFailed {
        letter: DriveLetter,
        mechanism: MappingMechanism,
        reason: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

fn summarize(attempts: &[AccessMappingAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AccessError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Conflict { .. } => ErrorCategory::AccessConflict,
            Self::Unreachable { .. } | Self::IndirectionTimeout(_) => ErrorCategory::Timeout,
            Self::Exhausted { .. }
            | Self::Indirection(_)
            | Self::RemovalFailed { .. }
            | Self::Cancelled => ErrorCategory::Generic,
        }
    }

    /// Mechanism the failure is attributed to
    pub fn mechanism(&self) -> Option<MappingMechanism> {
        match self {
            Self::Conflict { mechanism, .. } | Self::RemovalFailed { mechanism, .. } => {
                Some(*mechanism)
            }
            Self::Exhausted { attempts, .. } => attempts.last().map(|a| a.mechanism),
            Self::IndirectionTimeout(_) | Self::Indirection(_) => {
                Some(MappingMechanism::UserContextTask)
            }
            Self::Unreachable { .. } | Self::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_types::{AttemptOutcome, VerificationMethod};

    #[test]
    fn exhausted_error_lists_every_attempt() {
        let error = AccessError::Exhausted {
            letter: DriveLetter::new('Z').unwrap(),
            attempts: vec![
                AccessMappingAttempt {
                    mechanism: MappingMechanism::NetworkUse,
                    outcome: AttemptOutcome::Failed("System error 67".to_string()),
                    verification: VerificationMethod::DirectQuery,
                },
                AccessMappingAttempt {
                    mechanism: MappingMechanism::FilesystemProvider,
                    outcome: AttemptOutcome::Failed("access denied".to_string()),
                    verification: VerificationMethod::DirectQuery,
                },
            ],
        };

        let message = error.to_string();
        assert!(message.contains("net use: System error 67"));
        assert!(message.contains("psdrive: access denied"));
        assert_eq!(error.mechanism(), Some(MappingMechanism::FilesystemProvider));
        assert_eq!(error.category(), ErrorCategory::Generic);
    }

    #[test]
    fn indirection_timeout_is_a_timeout_of_the_task_step() {
        let error = AccessError::IndirectionTimeout("MountBridge-1".to_string());
        assert_eq!(error.category(), ErrorCategory::Timeout);
        assert_eq!(error.mechanism(), Some(MappingMechanism::UserContextTask));
    }
}
