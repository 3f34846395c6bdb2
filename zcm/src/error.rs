// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;
use zcm_types::CloneId;
use zcm_zfs::ZfsError;

/// Error types for clone manager operations
///
/// Everything except `Storage` and `Io` is raised before the first mutating
/// adapter call of the failing operation.
#[derive(Error, Debug)]
pub enum ZcmError {
    #[error("{root} is not managed for path {path}")]
    NotAManager { root: String, path: PathBuf },

    #[error("Invalid clone dataset: {0}")]
    InvalidClone(String),

    #[error("No active clone")]
    NoActiveClone,

    #[error("Clone not found: {0}")]
    CloneNotFound(CloneId),

    #[error("Clone {0} is already active")]
    AlreadyActive(CloneId),

    #[error("Cannot remove active clone {0}")]
    CannotRemoveActive(CloneId),

    #[error("Max {limit} clones limit reached: {count} > {max}")]
    PolicyViolation {
        limit: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Cannot satisfy max total {max} with {count} clones")]
    PolicyUnsatisfiable { count: usize, max: usize },

    #[error("Several clones are mounted at the external path: {0:?}")]
    MultipleActive(Vec<CloneId>),

    #[error("Already managed: {0}")]
    AlreadyManaged(String),

    #[error("Dataset {0} has children")]
    HasChildren(String),

    #[error("Dataset {0} is not a filesystem")]
    NotAFilesystem(String),

    #[error("{0} already exists; use migrate to take it over")]
    MigrationRequired(String),

    #[error("No free temporary name for {0}")]
    TemporaryNameExhausted(String),

    #[error("Clone id space exhausted")]
    IdsExhausted,

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("Another process holds the lock {0}")]
    Locked(PathBuf),

    #[error("Storage error: {0}")]
    Storage(#[from] ZfsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZcmError {
    /// Whether the error came from the storage tool rather than a domain check.
    pub fn is_storage(&self) -> bool {
        matches!(self, ZcmError::Storage(_))
    }
}

/// Result type alias for clone manager operations
pub type Result<T> = std::result::Result<T, ZcmError>;
