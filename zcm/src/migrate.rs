// SPDX-License-Identifier: GPL-3.0-only

//! Helpers for taking over existing content

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, ZcmError};

/// Attempts at finding an unused temporary name
pub const TEMPORARY_NAME_ATTEMPTS: usize = 8;

/// Eight random lowercase hex digits.
pub fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// First candidate from `candidate` for which `taken` is false.
///
/// Gives up with `TemporaryNameExhausted` after `TEMPORARY_NAME_ATTEMPTS`.
pub fn unused_name<F, T>(subject: &str, mut candidate: F, mut taken: T) -> Result<String>
where
    F: FnMut() -> String,
    T: FnMut(&str) -> Result<bool>,
{
    for _ in 0..TEMPORARY_NAME_ATTEMPTS {
        let name = candidate();
        if !taken(&name)? {
            return Ok(name);
        }
        debug!("Temporary name {} is taken", name);
    }
    Err(ZcmError::TemporaryNameExhausted(subject.to_string()))
}

/// Unused sibling name for `path`, `{path}.{random8}`.
pub fn temporary_dir(path: &Path) -> Result<PathBuf> {
    let name = unused_name(
        &path.display().to_string(),
        || format!("{}.{}", path.display(), random_suffix()),
        |candidate| Ok(Path::new(candidate).exists()),
    )?;
    Ok(PathBuf::from(name))
}

/// Whether `path` is missing or an empty directory.
pub fn is_missing_or_empty(path: &Path) -> io::Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

/// Copy the content of `from` into the existing directory `to`.
///
/// Directories, regular files and symlinks are copied with their permissions;
/// other file types are skipped.
pub fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            symlink(fs::read_link(&source)?, &target)?;
        } else if file_type.is_dir() {
            fs::create_dir(&target)?;
            copy_tree(&source, &target)?;
            fs::set_permissions(&target, entry.metadata()?.permissions())?;
        } else if file_type.is_file() {
            fs::copy(&source, &target)?;
        } else {
            debug!("Skipping special file {}", source.display());
        }
    }
    Ok(())
}
