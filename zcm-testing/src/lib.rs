// SPDX-License-Identifier: GPL-3.0-only

//! Test support for the ZFS clone manager
//!
//! `MemoryZfs` implements `ZfsAdapter` over an in-memory dataset tree with
//! the behaviour the manager depends on: property inheritance, clone origins,
//! promotion, renames and mountpoint conflicts. Every call is recorded in a
//! call log and individual calls can be made to fail.

pub mod calls;
pub mod memory;

pub use calls::{Call, Op};
pub use memory::MemoryZfs;
