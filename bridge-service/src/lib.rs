// SPDX-License-Identifier: GPL-3.0-only

//! Mount Bridge orchestration engine
//!
//! Mounts a physical disk partition inside the Linux subsystem and exposes
//! it to the host at a drive letter or through its namespace path. The
//! [`orchestrator`] runs one workflow per call; the [`reconciler`] cleans up
//! persisted state at startup.

pub mod config;
#[cfg(feature = "test-hooks")]
pub mod hooks;
pub mod logging;
pub mod orchestrator;
pub mod reconciler;
pub mod runtime;

pub use config::{BridgeConfig, ConfigError};
pub use orchestrator::{
    Collaborators, MountOrchestrator, MountState, OrchestratorSettings, default_paths,
};
pub use reconciler::{ReconcileFailure, ReconcileReport, Reconciler};
pub use runtime::Bridge;
