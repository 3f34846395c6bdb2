// SPDX-License-Identifier: GPL-3.0-only

//! ZFS access for the clone manager
//!
//! `ZfsAdapter` is the capability surface the manager consumes. `ZfsCli`
//! implements it with the host `zfs` binary; `command` and `parse` keep
//! process execution and output parsing apart so both stay testable.

pub mod adapter;
pub mod cli;
pub mod command;
pub mod error;
pub mod parse;

pub use adapter::{DatasetType, PropertyRow, ZfsAdapter};
pub use cli::{RetryPolicy, ZfsCli};
pub use error::{Result, ZfsError};
