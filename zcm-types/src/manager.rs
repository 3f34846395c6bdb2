// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clone::CloneId;

/// User property on the root dataset whose value is the external path.
///
/// Its presence is what makes a dataset a managed root.
pub const MANAGER_PROPERTY: &str = "zfs_clone_manager:path";

/// User property on the root dataset recording the next id to allocate.
pub const NEXT_ID_PROPERTY: &str = "zfs_clone_manager:next_id";

/// Retention caps. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionLimits {
    /// Maximum number of clones older than the active one
    pub max_older: Option<usize>,

    /// Maximum number of clones newer than the active one
    pub max_newer: Option<usize>,

    /// Maximum number of clones in total, active included
    pub max_total: Option<usize>,
}

impl RetentionLimits {
    pub const UNBOUNDED: RetentionLimits = RetentionLimits {
        max_older: None,
        max_newer: None,
        max_total: None,
    };

    pub fn with_max_older(mut self, max: usize) -> Self {
        self.max_older = Some(max);
        self
    }

    pub fn with_max_newer(mut self, max: usize) -> Self {
        self.max_newer = Some(max);
        self
    }

    pub fn with_max_total(mut self, max: usize) -> Self {
        self.max_total = Some(max);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_older.is_none() && self.max_newer.is_none() && self.max_total.is_none()
    }

    /// Fill limits that are unset here from `defaults`.
    pub fn or(self, defaults: RetentionLimits) -> Self {
        Self {
            max_older: self.max_older.or(defaults.max_older),
            max_newer: self.max_newer.or(defaults.max_newer),
            max_total: self.max_total.or(defaults.max_total),
        }
    }
}

/// Summary of one managed dataset tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub root: String,
    pub path: PathBuf,
    pub active: Option<CloneId>,
    pub next_id: CloneId,
    pub total: usize,
    pub older: usize,
    pub newer: usize,
    pub used_bytes: u64,
}

/// A managed root discovered on the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedRoot {
    pub root: String,
    pub path: PathBuf,
}
