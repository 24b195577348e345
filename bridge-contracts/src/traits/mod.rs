// SPDX-License-Identifier: GPL-3.0-only

pub mod command;
pub mod inventory;
pub mod progress;
pub mod store;
pub mod system;

pub use command::{CommandRunner, ScriptGateway, UserContextRunner};
pub use inventory::DiskInventory;
pub use progress::{NullProgress, ProgressSink};
pub use store::MountStore;
pub use system::{KernelLog, PathProbe};
