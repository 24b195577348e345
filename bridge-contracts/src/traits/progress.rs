// SPDX-License-Identifier: GPL-3.0-only

use tokio::sync::mpsc::UnboundedSender;

/// Receives human-readable progress lines during a run
///
/// Reporting never blocks and never fails the run.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: String);
}

/// Discards progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _message: String) {}
}

impl ProgressSink for UnboundedSender<String> {
    fn report(&self, message: String) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.send(message);
    }
}
