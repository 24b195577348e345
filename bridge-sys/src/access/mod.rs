// SPDX-License-Identifier: GPL-3.0-only

//! Drive-letter access to mounted partitions
//!
//! The mount's network path is exposed at a drive letter through one of
//! three host mechanisms. The letter is a system-wide resource: an existing
//! mapping to the same target is recreated, a mapping to anything else is a
//! conflict and is never overwritten.

mod normalize;
mod strategy;
pub mod tables;

pub use normalize::{clean_target, is_namespace_path, normalize_target, same_target};
pub use strategy::{AccessStrategy, AccessStrategyConfig, MappingReport};
pub use tables::MappingEntry;
