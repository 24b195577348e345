// SPDX-License-Identifier: GPL-3.0-only

//! Low-level host operations for Mount Bridge
//!
//! This crate talks to the host directly:
//! - Script execution across the elevation boundary
//! - The `KEY=VALUE` result protocol spoken by those scripts
//! - Classification of mount failures from error text and kernel log
//! - Drive-letter mapping through `subst`, `net use` and PowerShell drives
//! - Running commands as the interactive user from an elevated process
//! - File-backed persistence of active mounts
//!
//! Everything that waits (process exit, result files, reachability) goes
//! through [`retry::poll_until`] or a bounded `tokio::time::timeout` and
//! honours a shared [`tokio_util::sync::CancellationToken`].

pub mod access;
pub mod classifier;
pub mod elevation;
pub mod error;
pub mod gateway;
pub mod indirection;
pub mod inventory;
pub mod kernel_log;
pub mod powershell;
pub mod probe;
pub mod process;
pub mod protocol;
pub mod retry;
pub mod store;

pub use access::{AccessStrategy, AccessStrategyConfig, MappingReport};
pub use classifier::{Classification, FailureClassifier};
pub use error::{AccessError, ProtocolError};
pub use gateway::{GatewayConfig, PowerShellGateway};
pub use indirection::{ScheduledTaskRunner, TaskRunnerConfig};
pub use inventory::PowerShellDiskInventory;
pub use kernel_log::WslKernelLog;
pub use probe::FsPathProbe;
pub use process::TokioCommandRunner;
pub use protocol::{MountReply, ScriptReply};
pub use retry::{PollError, RetryPolicy, poll_until};
pub use store::JsonMountStore;
