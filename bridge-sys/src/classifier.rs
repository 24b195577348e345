// SPDX-License-Identifier: GPL-3.0-only

//! Mount failure classification
//!
//! The subsystem reports most incompatible-filesystem failures as a bare
//! "Invalid argument". Only the kernel log says why, so an ambiguous error
//! triggers a look at the tail of `dmesg`.

use std::sync::Arc;

use bridge_contracts::KernelLog;
use bridge_types::ErrorCategory;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const AMBIGUOUS_PATTERN: &str = "invalid argument";

const INCOMPATIBILITY_SIGNATURES: [&str; 5] = [
    "unknown incompatible features",
    "cannot be safely mounted by this kernel",
    "validate failed",
    "couldn't mount because of unsupported optional features",
    "unsupported feature",
];

const EXCERPT_LINES: usize = 3;

pub const GENERIC_HINT: &str =
    "Make sure the disk is not in use by Windows (close Explorer windows, take it offline) and try again.";

pub const INCOMPATIBLE_HINT: &str = "The filesystem uses features the subsystem kernel cannot mount safely. \
     Update the subsystem kernel or mount the disk natively on a Linux machine.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub hint: String,
    /// Matching kernel log lines, for display or log attachment
    pub diagnostic: Option<String>,
}

impl Classification {
    fn generic() -> Self {
        Self {
            category: ErrorCategory::Generic,
            hint: GENERIC_HINT.to_string(),
            diagnostic: None,
        }
    }
}

/// Strip control characters and collapse whitespace runs to single spaces
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_ambiguous(sanitized: &str) -> bool {
    sanitized.to_lowercase().contains(AMBIGUOUS_PATTERN)
}

/// Last few log lines carrying an incompatibility signature
pub fn incompatibility_excerpt(log_lines: &[String]) -> Option<String> {
    let hits: Vec<String> = log_lines
        .iter()
        .filter(|line| {
            let lowered = line.to_lowercase();
            INCOMPATIBILITY_SIGNATURES
                .iter()
                .any(|signature| lowered.contains(signature))
        })
        .map(|line| sanitize(line))
        .collect();

    if hits.is_empty() {
        return None;
    }
    let start = hits.len().saturating_sub(EXCERPT_LINES);
    Some(hits[start..].join("\n"))
}

pub struct FailureClassifier {
    kernel_log: Arc<dyn KernelLog>,
    tail_lines: usize,
}

impl FailureClassifier {
    pub fn new(kernel_log: Arc<dyn KernelLog>, tail_lines: usize) -> Self {
        Self {
            kernel_log,
            tail_lines,
        }
    }

    /// Classify raw error text; never fails
    pub async fn classify(
        &self,
        raw: &str,
        distro: Option<&str>,
        cancel: &CancellationToken,
    ) -> Classification {
        let text = sanitize(raw);
        if !is_ambiguous(&text) {
            return Classification::generic();
        }

        debug!("Ambiguous mount error, inspecting kernel log");
        let lines = match self.kernel_log.tail(distro, self.tail_lines, cancel).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Kernel log unavailable, keeping generic classification: {}", e);
                return Classification::generic();
            }
        };

        match incompatibility_excerpt(&lines) {
            Some(excerpt) => Classification {
                category: ErrorCategory::FilesystemIncompatible,
                hint: INCOMPATIBLE_HINT.to_string(),
                diagnostic: Some(excerpt),
            },
            None => Classification::generic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_contracts::BridgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLog {
        lines: Result<Vec<String>, BridgeError>,
        calls: AtomicUsize,
    }

    impl FakeLog {
        fn with(lines: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                lines: Ok(lines.iter().map(|l| l.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                lines: Err(BridgeError::unavailable("dmesg: read kernel buffer failed")),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl KernelLog for FakeLog {
        async fn tail(
            &self,
            _distro: Option<&str>,
            _lines: usize,
            _cancel: &CancellationToken,
        ) -> Result<Vec<String>, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lines.clone()
        }
    }

    const EXT4_LOG: [&str; 5] = [
        "[  1.0] EXT4-fs (sdc1): mounted filesystem",
        "[  2.0] EXT4-fs (sdd1): couldn't mount RDWR because of unsupported optional features (400)",
        "[  2.1] EXT4-fs (sdd1): Filesystem has unknown incompatible features (10000)",
        "[  2.2] EXT4-fs (sdd1): unknown incompatible features, cannot mount",
        "[  2.3] BTRFS error (device sdd2): superblock validate failed",
    ];

    #[test]
    fn sanitize_strips_control_characters_and_collapses_whitespace() {
        assert_eq!(
            sanitize("mount:\u{0}\u{7} Invalid\r\n\targument  \u{1b}[0m"),
            "mount: Invalid argument [0m"
        );
    }

    #[tokio::test]
    async fn text_without_invalid_argument_is_generic_whatever_the_log_says() {
        let log = FakeLog::with(&EXT4_LOG);
        let classifier = FailureClassifier::new(log.clone(), 100);

        let result = classifier
            .classify("The disk is in use by another process", None, &CancellationToken::new())
            .await;

        assert_eq!(result.category, ErrorCategory::Generic);
        assert_eq!(result.hint, GENERIC_HINT);
        assert_eq!(log.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_argument_with_signature_is_filesystem_incompatible() {
        let classifier = FailureClassifier::new(FakeLog::with(&EXT4_LOG), 100);

        let result = classifier
            .classify(
                "mount: /mnt/wsl/PHYSICALDRIVE1p2: \u{0}Invalid argument",
                Some("Ubuntu"),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.category, ErrorCategory::FilesystemIncompatible);
        assert_eq!(result.hint, INCOMPATIBLE_HINT);
        let excerpt = result.diagnostic.unwrap();
        assert_eq!(excerpt.lines().count(), 3);
        assert!(excerpt.ends_with("superblock validate failed"));
        assert!(!excerpt.contains("mounted filesystem"));
    }

    #[tokio::test]
    async fn invalid_argument_without_signature_stays_generic() {
        let classifier = FailureClassifier::new(FakeLog::with(&[EXT4_LOG[0]]), 100);
        let result = classifier
            .classify("Invalid argument", None, &CancellationToken::new())
            .await;
        assert_eq!(result.category, ErrorCategory::Generic);
        assert!(result.diagnostic.is_none());
    }

    #[tokio::test]
    async fn unreadable_kernel_log_falls_back_to_generic() {
        let classifier = FailureClassifier::new(FakeLog::failing(), 100);
        let result = classifier
            .classify("INVALID ARGUMENT", None, &CancellationToken::new())
            .await;
        assert_eq!(result.category, ErrorCategory::Generic);
    }
}
