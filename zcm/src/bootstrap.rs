// SPDX-License-Identifier: GPL-3.0-only

//! Creating a managed tree, from scratch or from existing content

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use zcm_types::{CLONES_DIR, CloneId, MANAGER_PROPERTY, NEXT_ID_PROPERTY, clone_dataset_name};
use zcm_zfs::{DatasetType, PropertyRow, ZfsAdapter};

use crate::error::{Result, ZcmError};
use crate::manager::Manager;
use crate::migrate::{self, copy_tree, is_missing_or_empty, random_suffix, unused_name};

/// How `Manager::bootstrap` takes over a root and path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Neither the dataset nor any content at the path exists
    Fresh,
    /// The path holds content that is moved into the first clone
    MigrateDirectory,
    /// A plain dataset becomes the first clone
    MigrateDataset,
}

fn dataset_row<A: ZfsAdapter>(adapter: &A, root: &str) -> Result<Option<PropertyRow>> {
    if !adapter.exists(root)? {
        return Ok(None);
    }
    let rows = adapter.list(
        Some(root),
        DatasetType::All,
        &["name", "type", MANAGER_PROPERTY, "mountpoint", "mounted"],
        false,
    )?;
    Ok(rows.into_iter().find(|row| row.name() == root))
}

fn has_children<A: ZfsAdapter>(adapter: &A, root: &str) -> Result<bool> {
    let rows = adapter.list(Some(root), DatasetType::All, &["name"], true)?;
    Ok(rows
        .iter()
        .any(|row| row.name() != root && !row.name().contains('@')))
}

/// Decide how `root` and `path` can be taken over, without changing anything.
pub fn detect_mode<A: ZfsAdapter>(
    adapter: &A,
    root: &str,
    path: &Path,
    migrate: bool,
) -> Result<BootstrapMode> {
    if Manager::managers(adapter)?
        .iter()
        .any(|managed| managed.path == path)
    {
        return Err(ZcmError::AlreadyManaged(path.display().to_string()));
    }
    if path.exists() && !path.is_dir() {
        return Err(ZcmError::InvalidPath(path.to_path_buf()));
    }

    match dataset_row(adapter, root)? {
        Some(row) => {
            if row.get(MANAGER_PROPERTY).is_some() {
                return Err(ZcmError::AlreadyManaged(root.to_string()));
            }
            if row.get("type") != Some("filesystem") {
                return Err(ZcmError::NotAFilesystem(root.to_string()));
            }
            if has_children(adapter, root)? {
                return Err(ZcmError::HasChildren(root.to_string()));
            }
            if !migrate {
                return Err(ZcmError::MigrationRequired(root.to_string()));
            }
            let mounted_at_path = row.get("mounted") == Some("yes")
                && row.get("mountpoint").map(Path::new) == Some(path);
            if !mounted_at_path && !is_missing_or_empty(path)? {
                return Err(ZcmError::MigrationRequired(path.display().to_string()));
            }
            Ok(BootstrapMode::MigrateDataset)
        }
        None if is_missing_or_empty(path)? => Ok(BootstrapMode::Fresh),
        None if migrate => Ok(BootstrapMode::MigrateDirectory),
        None => Err(ZcmError::MigrationRequired(path.display().to_string())),
    }
}

/// Create the managed root, unmounted, with the marker and the `.clones` mountpoint.
fn create_root<A: ZfsAdapter>(adapter: &A, root: &str, path: &Path, parents: bool) -> Result<()> {
    let marker = path.display().to_string();
    let clones_dir = path.join(CLONES_DIR).display().to_string();
    let high_water = CloneId::FIRST
        .next()
        .ok_or(ZcmError::IdsExhausted)?
        .to_string();

    adapter.create(
        root,
        &[
            (MANAGER_PROPERTY, marker.as_str()),
            ("mountpoint", clones_dir.as_str()),
            (NEXT_ID_PROPERTY, high_water.as_str()),
        ],
        parents,
        false,
    )?;
    Ok(())
}

fn create_fresh<A: ZfsAdapter>(adapter: &A, root: &str, path: &Path) -> Result<()> {
    create_root(adapter, root, path, true)?;
    let marker = path.display().to_string();
    adapter.create(
        &clone_dataset_name(root, CloneId::FIRST),
        &[("mountpoint", marker.as_str())],
        false,
        false,
    )?;
    Ok(())
}

impl<A: ZfsAdapter> Manager<A> {
    /// Put `root` under management with its clones exposed at `path`.
    ///
    /// Existing content, either a plain dataset named `root` or files under
    /// `path`, is only taken over when `migrate` is set. It becomes clone
    /// `00000000`.
    pub fn bootstrap(
        adapter: A,
        root: impl Into<String>,
        path: impl Into<PathBuf>,
        migrate: bool,
    ) -> Result<Self> {
        let root = root.into();
        let path = path.into();
        let mode = detect_mode(&adapter, &root, &path, migrate)?;
        info!("Bootstrapping {} at {} ({:?})", root, path.display(), mode);

        match mode {
            BootstrapMode::Fresh => {
                create_fresh(&adapter, &root, &path)?;
                let mut manager = Self::load_root(adapter, root, path)?;
                manager.mount()?;
                Ok(manager)
            }
            BootstrapMode::MigrateDirectory => {
                let temporary = migrate::temporary_dir(&path)?;
                fs::rename(&path, &temporary)?;
                info!("Moved {} aside to {}", path.display(), temporary.display());

                create_fresh(&adapter, &root, &path)?;
                let mut manager = Self::load_root(adapter, root, path)?;
                manager.mount()?;

                copy_tree(&temporary, manager.path())?;
                fs::remove_dir_all(&temporary)?;
                info!("Migrated content of {} into {}", temporary.display(), manager.root());
                Ok(manager)
            }
            BootstrapMode::MigrateDataset => {
                let temporary = unused_name(
                    &root,
                    || format!("{root}_{}", random_suffix()),
                    |candidate| Ok(adapter.exists(candidate)?),
                )?;
                adapter.rename(&root, &temporary)?;
                create_root(&adapter, &root, &path, false)?;

                let first = clone_dataset_name(&root, CloneId::FIRST);
                adapter.rename(&temporary, &first)?;
                adapter.set(&first, "mountpoint", &path.display().to_string())?;
                info!("Migrated dataset {} into {}", root, first);

                let mut manager = Self::load_root(adapter, root, path)?;
                manager.mount()?;
                Ok(manager)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcm_testing::MemoryZfs;

    #[test]
    fn fresh_when_nothing_exists() {
        let zfs = MemoryZfs::new().with_pool("tank");
        let dir = tempfile::tempdir().unwrap();
        let mode = detect_mode(&zfs, "tank/app", &dir.path().join("app"), false).unwrap();
        assert_eq!(mode, BootstrapMode::Fresh);
    }

    #[test]
    fn content_requires_migrate() {
        let zfs = MemoryZfs::new().with_pool("tank");
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data"), b"x").unwrap();

        assert!(matches!(
            detect_mode(&zfs, "tank/app", dir.path(), false),
            Err(ZcmError::MigrationRequired(_))
        ));
        assert_eq!(
            detect_mode(&zfs, "tank/app", dir.path(), true).unwrap(),
            BootstrapMode::MigrateDirectory
        );
    }

    #[test]
    fn existing_dataset_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app");

        let zfs = MemoryZfs::new().with_pool("tank").with_filesystem("tank/app");
        assert!(matches!(
            detect_mode(&zfs, "tank/app", &path, false),
            Err(ZcmError::MigrationRequired(_))
        ));
        assert_eq!(
            detect_mode(&zfs, "tank/app", &path, true).unwrap(),
            BootstrapMode::MigrateDataset
        );

        let zfs = MemoryZfs::new()
            .with_pool("tank")
            .with_filesystem("tank/app/child");
        assert!(matches!(
            detect_mode(&zfs, "tank/app", &path, true),
            Err(ZcmError::HasChildren(_))
        ));

        let zfs = MemoryZfs::new().with_pool("tank").with_volume("tank/app");
        assert!(matches!(
            detect_mode(&zfs, "tank/app", &path, true),
            Err(ZcmError::NotAFilesystem(_))
        ));
    }

    #[test]
    fn managed_roots_and_paths_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app");
        let zfs = MemoryZfs::new().with_pool("tank");
        Manager::bootstrap(&zfs, "tank/app", &path, false).unwrap();

        assert!(matches!(
            detect_mode(&zfs, "tank/app", &dir.path().join("other"), true),
            Err(ZcmError::AlreadyManaged(name)) if name == "tank/app"
        ));
        assert!(matches!(
            detect_mode(&zfs, "tank/other", &path, true),
            Err(ZcmError::AlreadyManaged(_))
        ));
    }
}
