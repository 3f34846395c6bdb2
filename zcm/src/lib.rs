// SPDX-License-Identifier: GPL-3.0-only

//! ZFS clone manager
//!
//! Keeps a chain of ZFS clones under one root dataset and swaps which of them
//! is mounted at an external path, boot-environment style. Every mutation is
//! followed by a reload from the adapter, which is the only source of truth.

pub mod bootstrap;
pub mod error;
pub mod lock;
pub mod manager;
pub mod migrate;
pub mod policy;

pub use bootstrap::BootstrapMode;
pub use error::{Result, ZcmError};
pub use lock::ManagerLock;
pub use manager::Manager;

pub use zcm_types::{CloneId, ManagedClone, ManagedRoot, ManagerInfo, RetentionLimits};
pub use zcm_zfs::{ZfsAdapter, ZfsCli, ZfsError};
