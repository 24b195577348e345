// SPDX-License-Identifier: GPL-3.0-only

//! Host access mapping attempts

use serde::{Deserialize, Serialize};

/// Mechanism used to expose a network path at a drive letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMechanism {
    /// `subst` substitution table
    Substitution,
    /// `net use` network-use table
    NetworkUse,
    /// PowerShell filesystem provider drive (`New-PSDrive -Persist`)
    FilesystemProvider,
    /// One-shot scheduled task run as the interactive user
    UserContextTask,
}

impl MappingMechanism {
    /// Mechanisms that actually create a mapping, in table query order
    pub const TABLES: [MappingMechanism; 3] = [
        MappingMechanism::Substitution,
        MappingMechanism::NetworkUse,
        MappingMechanism::FilesystemProvider,
    ];
}

impl std::fmt::Display for MappingMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Substitution => "subst",
            Self::NetworkUse => "net use",
            Self::FilesystemProvider => "psdrive",
            Self::UserContextTask => "user-context task",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum AttemptOutcome {
    Mapped,
    Failed(String),
    /// Command reported success but the table did not show the expected target
    Unverified(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Mapping table queried in the current process context
    DirectQuery,
    /// Mapping table queried through the user-context task
    UserContextQuery,
    NotVerified,
}

/// One mechanism tried during a mapping call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMappingAttempt {
    pub mechanism: MappingMechanism,
    pub outcome: AttemptOutcome,
    pub verification: VerificationMethod,
}

impl AccessMappingAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Mapped
    }
}

impl std::fmt::Display for AccessMappingAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            AttemptOutcome::Mapped => write!(f, "{}: mapped", self.mechanism),
            AttemptOutcome::Failed(reason) => write!(f, "{}: {}", self.mechanism, reason),
            AttemptOutcome::Unverified(reason) => {
                write!(f, "{}: unverified ({})", self.mechanism, reason)
            }
        }
    }
}
