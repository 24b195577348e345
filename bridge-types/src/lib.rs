// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for Mount Bridge
//!
//! These types are shared by every layer of the stack:
//!
//! - **bridge-sys**: builds and parses subprocess traffic in terms of these types
//! - **bridge-service**: drives the mount workflow and persists [`ActiveMount`] records
//! - **callers** (CLI, GUI shells): consume [`MountOutcome`] and [`ErrorCategory`]
//!
//! ## Lifecycles
//!
//! - [`MountRequest`] → validated once, then discarded
//! - [`MountOutcome`] → built once per orchestration run, read-only afterwards
//! - [`ActiveMount`] → persisted on success, refreshed by re-verification,
//!   removed on unmount or when reconciliation finds it stale

pub mod disk;
pub mod mapping;
pub mod mount;
pub mod outcome;
pub mod request;

pub use disk::*;
pub use mapping::*;
pub use mount::*;
pub use outcome::*;
pub use request::*;
