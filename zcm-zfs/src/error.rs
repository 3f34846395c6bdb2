// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for ZFS operations
#[derive(Error, Debug)]
pub enum ZfsError {
    #[error("zfs binary not found: {0}")]
    BinaryNotFound(String),

    #[error("command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("dataset busy: {command}: {stderr}")]
    Busy { command: String, stderr: String },

    #[error("command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZfsError {
    /// Whether the failure is a transient busy condition.
    pub fn is_busy(&self) -> bool {
        matches!(self, ZfsError::Busy { .. })
    }

    /// Classify a failed invocation from its stderr.
    pub fn from_stderr(command: String, stderr: String) -> Self {
        if stderr.to_ascii_lowercase().contains("busy") {
            ZfsError::Busy { command, stderr }
        } else {
            ZfsError::CommandFailed { command, stderr }
        }
    }
}

/// Result type alias for ZFS operations
pub type Result<T> = std::result::Result<T, ZfsError>;

#[cfg(test)]
mod tests {
    use super::ZfsError;

    #[test]
    fn classifies_busy_stderr() {
        let error = ZfsError::from_stderr(
            "zfs unmount tank/a".to_string(),
            "cannot unmount '/a': pool or dataset is busy".to_string(),
        );
        assert!(error.is_busy());

        let error = ZfsError::from_stderr(
            "zfs destroy tank/a".to_string(),
            "cannot destroy 'tank/a': filesystem has children".to_string(),
        );
        assert!(!error.is_busy());
        assert!(error.to_string().contains("tank/a"));
    }
}
