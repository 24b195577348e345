// SPDX-License-Identifier: GPL-3.0-only

//! Orchestration outcomes and the error taxonomy callers act on

use serde::{Deserialize, Serialize};

/// Category assigned to a failed run
///
/// The string codes are a stable contract: callers decide on user messaging
/// and on offering an alternate mount strategy based on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Generic,
    UnsupportedOperation,
    FilesystemIncompatible,
    Validation,
    ElevationDenied,
    Protocol,
    AccessConflict,
    Timeout,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            Self::Generic => "GENERIC",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::FilesystemIncompatible => "FILESYSTEM_INCOMPATIBLE",
            Self::Validation => "VALIDATION",
            Self::ElevationDenied => "ELEVATION_DENIED",
            Self::Protocol => "PROTOCOL",
            Self::AccessConflict => "ACCESS_CONFLICT",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Whether a caller may offer a different mount strategy for this failure
    pub fn offers_fallback(self) -> bool {
        matches!(self, Self::FilesystemIncompatible | Self::UnsupportedOperation)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Workflow step a run failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStep {
    Validating,
    Mounting,
    VerifyingReachability,
    MappingAccess,
    Registering,
    Unmapping,
    Unmounting,
}

impl std::fmt::Display for FailedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Mounting => "mounting",
            Self::VerifyingReachability => "verifying_reachability",
            Self::MappingAccess => "mapping_access",
            Self::Registering => "registering",
            Self::Unmapping => "unmapping",
            Self::Unmounting => "unmounting",
        };
        f.write_str(name)
    }
}

/// What a caller can sensibly offer after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    None,
    FixInput,
    /// The partition is mounted; only the host access point is missing
    RetryMapping,
    RetryOperation,
    MountNatively,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FailureDetail {
    message: String,
    step: FailedStep,
    category: ErrorCategory,
    hint: Option<String>,
    diagnostic: Option<String>,
}

/// Result of one mount, unmount or remap run
///
/// Built once through [`MountOutcome::builder`] or [`MountOutcome::failed`]
/// and read through accessors afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOutcome {
    success: bool,
    distro: Option<String>,
    linux_path: Option<String>,
    unc_path: Option<String>,
    access_path: Option<String>,
    already_mounted: Option<bool>,
    verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureDetail>,
}

/// Builder for [`MountOutcome`]
#[derive(Debug, Clone, Default)]
pub struct OutcomeBuilder {
    distro: Option<String>,
    linux_path: Option<String>,
    unc_path: Option<String>,
    access_path: Option<String>,
    already_mounted: Option<bool>,
    verified: Option<bool>,
}

impl OutcomeBuilder {
    pub fn distro(mut self, distro: impl Into<String>) -> Self {
        self.distro = Some(distro.into());
        self
    }

    pub fn linux_path(mut self, path: impl Into<String>) -> Self {
        self.linux_path = Some(path.into());
        self
    }

    pub fn unc_path(mut self, path: impl Into<String>) -> Self {
        self.unc_path = Some(path.into());
        self
    }

    pub fn access_path(mut self, path: impl Into<String>) -> Self {
        self.access_path = Some(path.into());
        self
    }

    pub fn already_mounted(mut self, value: bool) -> Self {
        self.already_mounted = Some(value);
        self
    }

    pub fn verified(mut self, value: bool) -> Self {
        self.verified = Some(value);
        self
    }

    pub fn succeeded(self) -> MountOutcome {
        self.finish(None)
    }

    pub fn failed(self, failure: Failure) -> MountOutcome {
        self.finish(Some(FailureDetail {
            message: failure.message,
            step: failure.step,
            category: failure.category,
            hint: failure.hint,
            diagnostic: failure.diagnostic,
        }))
    }

    fn finish(self, failure: Option<FailureDetail>) -> MountOutcome {
        MountOutcome {
            success: failure.is_none(),
            distro: self.distro,
            linux_path: self.linux_path,
            unc_path: self.unc_path,
            access_path: self.access_path,
            already_mounted: self.already_mounted,
            verified: self.verified,
            failure,
        }
    }
}

/// Failure description attached to an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub step: FailedStep,
    pub category: ErrorCategory,
    pub hint: Option<String>,
    pub diagnostic: Option<String>,
}

impl Failure {
    pub fn new(step: FailedStep, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step,
            category,
            hint: None,
            diagnostic: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: Option<String>) -> Self {
        self.diagnostic = diagnostic.filter(|text| !text.is_empty());
        self
    }
}

impl MountOutcome {
    pub fn builder() -> OutcomeBuilder {
        OutcomeBuilder::default()
    }

    /// Failure with no resolved paths, e.g. rejected input
    pub fn failed(failure: Failure) -> Self {
        OutcomeBuilder::default().failed(failure)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn distro(&self) -> Option<&str> {
        self.distro.as_deref()
    }

    pub fn linux_path(&self) -> Option<&str> {
        self.linux_path.as_deref()
    }

    pub fn unc_path(&self) -> Option<&str> {
        self.unc_path.as_deref()
    }

    pub fn access_path(&self) -> Option<&str> {
        self.access_path.as_deref()
    }

    pub fn already_mounted(&self) -> Option<bool> {
        self.already_mounted
    }

    pub fn verified(&self) -> Option<bool> {
        self.verified
    }

    pub fn error_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }

    pub fn failed_step(&self) -> Option<FailedStep> {
        self.failure.as_ref().map(|f| f.step)
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.failure.as_ref().map(|f| f.category)
    }

    pub fn hint(&self) -> Option<&str> {
        self.failure.as_ref().and_then(|f| f.hint.as_deref())
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.failure.as_ref().and_then(|f| f.diagnostic.as_deref())
    }

    pub fn remediation(&self) -> Remediation {
        let Some(failure) = &self.failure else {
            return Remediation::None;
        };

        match (failure.step, failure.category) {
            (_, ErrorCategory::Validation) => Remediation::FixInput,
            (_, ErrorCategory::FilesystemIncompatible) => Remediation::MountNatively,
            (FailedStep::MappingAccess | FailedStep::Registering, _) => Remediation::RetryMapping,
            _ => Remediation::RetryOperation,
        }
    }
}
