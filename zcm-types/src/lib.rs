// SPDX-License-Identifier: GPL-3.0-only

//! Domain models for the ZFS clone manager
//!
//! These types are shared by the manager library, the ZFS adapter and the
//! `zcm` binary:
//!
//! - `CloneId` → the 8-digit hexadecimal identity of a clone
//! - `ManagedClone` → one clone dataset with its ancestry and mount state
//! - `ManagerInfo` → a serialisable summary of a managed tree
//! - `RetentionLimits` → the older/newer/total caps used by retention

pub mod clone;
pub mod common;
pub mod manager;

pub use clone::*;
pub use common::*;
pub use manager::*;
