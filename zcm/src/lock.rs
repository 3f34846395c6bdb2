// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::error::{Result, ZcmError};

/// Advisory, process-wide lock on one external path.
///
/// The lock file lives next to the external path, not inside it, so that it
/// survives activation and is reachable before the tree exists. Dropping the
/// value releases the lock.
pub struct ManagerLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl ManagerLock {
    /// Location of the lock file for `external_path`: `{parent}/.{name}.zcm.lock`.
    pub fn lock_path(external_path: &Path) -> Result<PathBuf> {
        let (Some(parent), Some(name)) = (external_path.parent(), external_path.file_name()) else {
            return Err(ZcmError::InvalidPath(external_path.to_path_buf()));
        };
        Ok(parent.join(format!(".{}.zcm.lock", name.to_string_lossy())))
    }

    /// Take the lock without blocking; fails with `Locked` when it is held.
    pub fn acquire(external_path: &Path) -> Result<Self> {
        let path = Self::lock_path(external_path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            if errno == Errno::EWOULDBLOCK {
                ZcmError::Locked(path.clone())
            } else {
                ZcmError::Io(errno.into())
            }
        })?;

        debug!("Locked {}", path.display());
        Ok(Self {
            _flock: flock,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_sits_next_to_the_path() {
        let path = ManagerLock::lock_path(Path::new("/srv/app")).unwrap();
        assert_eq!(path, PathBuf::from("/srv/.app.zcm.lock"));
        assert!(ManagerLock::lock_path(Path::new("/")).is_err());
    }

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let external = dir.path().join("app");

        let first = ManagerLock::acquire(&external).unwrap();
        assert!(first.path().exists());
        assert!(matches!(
            ManagerLock::acquire(&external),
            Err(ZcmError::Locked(_))
        ));

        drop(first);
        ManagerLock::acquire(&external).unwrap();
    }
}
