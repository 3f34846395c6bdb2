// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

/// Adapter operation kinds, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Exists,
    Create,
    Destroy,
    Clone,
    Snapshot,
    Promote,
    Rename,
    Mount,
    Unmount,
    Set,
    Inherit,
}

impl Op {
    /// Whether the operation changes the dataset tree or its mounts.
    pub fn is_mutation(self) -> bool {
        !matches!(self, Op::List | Op::Exists)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::List => "list",
            Op::Exists => "exists",
            Op::Create => "create",
            Op::Destroy => "destroy",
            Op::Clone => "clone",
            Op::Snapshot => "snapshot",
            Op::Promote => "promote",
            Op::Rename => "rename",
            Op::Mount => "mount",
            Op::Unmount => "unmount",
            Op::Set => "set",
            Op::Inherit => "inherit",
        }
    }
}

/// One adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,

    /// Dataset or snapshot the call acted on
    pub target: String,

    /// Secondary argument: new name, snapshot source, `property=value`, ...
    pub detail: Option<String>,
}

impl Call {
    pub fn new(op: Op, target: impl Into<String>) -> Self {
        Self {
            op,
            target: target.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is(&self, op: Op, target: &str) -> bool {
        self.op == op && self.target == target
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "zfs {} {} {}", self.op.as_str(), self.target, detail),
            None => write!(f, "zfs {} {}", self.op.as_str(), self.target),
        }
    }
}
