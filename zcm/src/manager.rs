// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use zcm_types::{
    CLONES_DIR, CloneId, MANAGER_PROPERTY, ManagedClone, ManagedRoot, ManagerInfo,
    NEXT_ID_PROPERTY, RetentionLimits, clone_dataset_name, parse_clone_dataset, parse_origin_id,
};
use zcm_zfs::parse::is_missing_dataset;
use zcm_zfs::{DatasetType, PropertyRow, ZfsAdapter, ZfsError};

use crate::error::{Result, ZcmError};
use crate::lock::ManagerLock;
use crate::policy;

const MOUNTPOINT: &str = "mountpoint";

const LOAD_PROPERTIES: &[&str] = &[
    "name",
    MANAGER_PROPERTY,
    "origin",
    "mountpoint",
    "mounted",
    "creation",
    "used",
    NEXT_ID_PROPERTY,
];

/// Manager for one tree of clones under a root dataset
///
/// The root dataset is mounted at `{path}/.clones` and carries the managed
/// marker. Its children are the clones; the active one has its mountpoint
/// overridden to `path`, the others inherit theirs from the root.
pub struct Manager<A: ZfsAdapter> {
    adapter: A,
    root: String,
    path: PathBuf,
    clones: Vec<ManagedClone>,
    active: Option<usize>,
    next_id: CloneId,
    root_mounted: bool,
}

impl<A: ZfsAdapter> Manager<A> {
    /// Load the manager of `root`, which must be managed for `path`.
    pub fn load_root(
        adapter: A,
        root: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut manager = Self {
            adapter,
            root: root.into(),
            path: path.into(),
            clones: Vec::new(),
            active: None,
            next_id: CloneId::FIRST,
            root_mounted: false,
        };
        manager.load()?;
        Ok(manager)
    }

    /// Find the root managed for `path` and load it.
    pub fn open(adapter: A, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let root = Self::managers(&adapter)?
            .into_iter()
            .find(|managed| managed.path == path)
            .map(|managed| managed.root)
            .ok_or_else(|| ZcmError::NotAManager {
                root: String::new(),
                path: path.clone(),
            })?;
        Self::load_root(adapter, root, path)
    }

    /// Every managed root on the system.
    ///
    /// Clones inherit the marker, so only datasets whose parent does not carry
    /// the same value count as roots.
    pub fn managers(adapter: &A) -> Result<Vec<ManagedRoot>> {
        let rows = adapter.list(
            None,
            DatasetType::Filesystem,
            &["name", MANAGER_PROPERTY],
            false,
        )?;

        let mut roots: Vec<ManagedRoot> = Vec::new();
        for row in &rows {
            let Some(marker) = row.get(MANAGER_PROPERTY) else {
                continue;
            };
            let name = row.name();
            let inherited = roots
                .iter()
                .any(|root| root.path == Path::new(marker) && is_descendant(name, &root.root));
            if !inherited {
                roots.push(ManagedRoot {
                    root: name.to_string(),
                    path: PathBuf::from(marker),
                });
            }
        }
        Ok(roots)
    }

    /// Rebuild the clone list from the adapter.
    pub fn load(&mut self) -> Result<()> {
        let rows = match self.adapter.list(
            Some(self.root.as_str()),
            DatasetType::Filesystem,
            LOAD_PROPERTIES,
            true,
        ) {
            Err(ZfsError::CommandFailed { stderr, .. }) if is_missing_dataset(&stderr) => {
                return Err(self.not_a_manager());
            }
            result => result?,
        };

        let mut rows = rows.iter();
        let root_row = rows
            .next()
            .filter(|row| row.name() == self.root)
            .ok_or_else(|| self.not_a_manager())?;
        if root_row.get(MANAGER_PROPERTY).map(Path::new) != Some(self.path.as_path()) {
            return Err(self.not_a_manager());
        }

        let mut clones = Vec::new();
        for row in rows {
            clones.push(self.parse_clone(row)?);
        }
        clones.sort_by_key(|clone| clone.id);

        let active: Vec<usize> = clones
            .iter()
            .enumerate()
            .filter(|(_, clone)| clone.mountpoint == self.path)
            .map(|(index, _)| index)
            .collect();
        if active.len() > 1 {
            return Err(ZcmError::MultipleActive(
                active.iter().map(|index| clones[*index].id).collect(),
            ));
        }

        let after_last = match clones.last() {
            Some(last) => last.id.next().ok_or(ZcmError::IdsExhausted)?,
            None => CloneId::FIRST,
        };
        let high_water = match root_row.get(NEXT_ID_PROPERTY) {
            Some(value) => match value.parse::<CloneId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("Ignoring {} on {}: {}", NEXT_ID_PROPERTY, self.root, e);
                    None
                }
            },
            None => None,
        };

        self.next_id = high_water.map_or(after_last, |high_water| high_water.max(after_last));
        self.root_mounted = is_yes(root_row.get("mounted"));
        self.active = active.first().copied();
        self.clones = clones;

        debug!(
            "Loaded {}: {} clones, active {:?}, next {}",
            self.root,
            self.clones.len(),
            self.active_clone().map(|clone| clone.id),
            self.next_id
        );
        Ok(())
    }

    fn parse_clone(&self, row: &PropertyRow) -> Result<ManagedClone> {
        let name = row.name();
        let id = parse_clone_dataset(&self.root, name)
            .ok_or_else(|| ZcmError::InvalidClone(name.to_string()))?;
        let origin = row.get("origin").map(str::to_string);
        let origin_id = origin
            .as_deref()
            .and_then(|origin| parse_origin_id(&self.root, origin));

        Ok(ManagedClone {
            id,
            dataset: name.to_string(),
            origin,
            origin_id,
            mountpoint: PathBuf::from(row.get("mountpoint").unwrap_or_default()),
            mounted: is_yes(row.get("mounted")),
            creation: row
                .get("creation")
                .and_then(|value| value.parse::<i64>().ok())
                .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
                .unwrap_or_default(),
            used_bytes: row
                .get("used")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
        })
    }

    fn not_a_manager(&self) -> ZcmError {
        ZcmError::NotAManager {
            root: self.root.clone(),
            path: self.path.clone(),
        }
    }

    /// Snapshot the active clone and clone the snapshot as the next id.
    ///
    /// Returns the new clone as it was right after creation, even when
    /// `auto_remove` trims it again.
    pub fn clone(&mut self, limits: RetentionLimits, auto_remove: bool) -> Result<ManagedClone> {
        let active = self.active_clone().ok_or(ZcmError::NoActiveClone)?;
        if !auto_remove {
            policy::check_clone(self.newer_clones().len(), self.clones.len(), &limits)?;
        }

        let id = self.next_id;
        let high_water = id.next().ok_or(ZcmError::IdsExhausted)?;
        let source = active.dataset.clone();
        let dataset = clone_dataset_name(&self.root, id);

        // The id is spent before anything is created, so a failed attempt never
        // hands it out again.
        self.adapter
            .set(&self.root, NEXT_ID_PROPERTY, &high_water.to_string())?;
        let snapshot = self.adapter.snapshot(&source, &id.to_string())?;
        if let Err(e) = self.adapter.clone_snapshot(&snapshot, &dataset) {
            error!("Failed to clone {} into {}: {}", snapshot, dataset, e);
            if let Err(destroy_error) = self.adapter.destroy(&snapshot, false) {
                warn!("Failed to destroy {}: {}", snapshot, destroy_error);
            }
            return Err(e.into());
        }
        info!("Created clone {} from {}", dataset, snapshot);

        self.load()?;
        let created = self.get(id).cloned().ok_or(ZcmError::CloneNotFound(id))?;

        if auto_remove {
            self.auto_remove(RetentionLimits {
                max_older: None,
                ..limits
            })?;
        }
        Ok(created)
    }

    /// Make clone `id` the one mounted at the external path.
    pub fn activate(
        &mut self,
        id: CloneId,
        limits: RetentionLimits,
        auto_remove: bool,
    ) -> Result<()> {
        let index = self.index_of(id).ok_or(ZcmError::CloneNotFound(id))?;
        if self.active == Some(index) {
            return Err(ZcmError::AlreadyActive(id));
        }
        if !auto_remove {
            let older = index;
            let newer = self.clones.len() - index - 1;
            policy::check_activate(older, newer, self.clones.len(), &limits)?;
        }

        let previous = self.active_clone().map(|clone| clone.dataset.clone());
        let target = self.clones[index].dataset.clone();
        let path = self.path.display().to_string();

        // Nothing may be mounted while the mountpoint overrides change hands.
        self.unmount()?;
        if let Some(previous) = &previous {
            self.adapter.inherit(previous, MOUNTPOINT)?;
        }
        self.adapter.set(&target, MOUNTPOINT, &path)?;
        self.load()?;
        self.mount()?;
        info!("Activated {} at {}", target, path);

        self.auto_remove(limits)?;
        Ok(())
    }

    /// Destroy clone `id`, promoting its most recent child first if it has any.
    pub fn remove(&mut self, id: CloneId) -> Result<()> {
        let index = self.index_of(id).ok_or(ZcmError::CloneNotFound(id))?;
        if self.active == Some(index) {
            return Err(ZcmError::CannotRemoveActive(id));
        }

        let target = self.clones[index].clone();
        let promoted = self
            .clones
            .iter()
            .filter(|clone| clone.origin_id == Some(id))
            .max_by_key(|clone| clone.id)
            .cloned();

        match promoted {
            Some(child) => {
                // The child takes over the snapshots up to its origin, and the
                // target becomes a clone of that origin moved onto the child.
                self.adapter.promote(&child.dataset)?;
                info!("Promoted {}", child.dataset);
                self.adapter.destroy(&target.dataset, false)?;
                let orphan = child.origin.as_deref().and_then(|o| o.split_once('@'));
                if let Some((_, snapshot)) = orphan {
                    self.adapter
                        .destroy(&format!("{}@{}", child.dataset, snapshot), false)?;
                }
            }
            None => {
                self.adapter.destroy(&target.dataset, false)?;
                if let (Some(origin), Some(_)) = (&target.origin, target.origin_id) {
                    self.adapter.destroy(origin, false)?;
                }
            }
        }
        info!("Removed clone {}", target.dataset);

        self.load()
    }

    /// Remove clones until `limits` hold, returning the removed ids in order.
    pub fn auto_remove(&mut self, limits: RetentionLimits) -> Result<Vec<CloneId>> {
        let mut removed = Vec::new();
        if limits.is_unbounded() {
            return Ok(removed);
        }

        if self.active.is_none() {
            return match limits.max_total {
                Some(max) if self.clones.len() > max => Err(ZcmError::NoActiveClone),
                _ => Ok(removed),
            };
        }

        loop {
            let older: Vec<CloneId> = self.older_clones().iter().map(|clone| clone.id).collect();
            let newer: Vec<CloneId> = self.newer_clones().iter().map(|clone| clone.id).collect();
            let Some(victim) = policy::next_victim(&older, &newer, &limits)? else {
                break;
            };
            debug!("Retention removes {}", victim);
            self.remove(victim)?;
            removed.push(victim);
        }

        if !removed.is_empty() {
            info!("Retention removed {} clones from {}", removed.len(), self.root);
        }
        Ok(removed)
    }

    /// Datasets in mount order: active, root, the rest ascending.
    fn mount_order(&self) -> Vec<(String, bool)> {
        let mut order = Vec::with_capacity(self.clones.len() + 1);
        if let Some(active) = self.active_clone() {
            order.push((active.dataset.clone(), active.mounted));
        }
        order.push((self.root.clone(), self.root_mounted));
        for (index, clone) in self.clones.iter().enumerate() {
            if Some(index) != self.active {
                order.push((clone.dataset.clone(), clone.mounted));
            }
        }
        order
    }

    /// Datasets in unmount order: the rest ascending, root, active last.
    fn unmount_order(&self) -> Vec<(String, bool)> {
        let mut order = self.mount_order();
        let active = self.active.map(|_| order.remove(0));
        let root = order.remove(0);
        order.push(root);
        order.extend(active);
        order
    }

    /// Mount every dataset that is not mounted, in mount order.
    pub fn mount(&mut self) -> Result<()> {
        for (dataset, mounted) in self.mount_order() {
            if !mounted {
                self.adapter.mount(&dataset).inspect_err(|e| {
                    error!("Failed to mount {}: {}", dataset, e);
                })?;
                debug!("Mounted {}", dataset);
            }
        }
        self.load()
    }

    /// Unmount every mounted dataset, active clone last.
    ///
    /// On failure whatever was already unmounted is mounted again before the
    /// error is returned.
    pub fn unmount(&mut self) -> Result<()> {
        let mount_order = self.mount_order();
        let unmount_order = self.unmount_order();
        let mut unmounted: Vec<&str> = Vec::new();

        for (dataset, mounted) in &unmount_order {
            if !mounted {
                continue;
            }
            if let Err(e) = self.adapter.unmount(dataset) {
                error!("Failed to unmount {}: {}", dataset, e);
                let remounts = mount_order
                    .iter()
                    .filter(|(name, _)| unmounted.contains(&name.as_str()));
                for (remount, _) in remounts {
                    if let Err(e) = self.adapter.mount(remount) {
                        warn!("Failed to remount {}: {}", remount, e);
                    }
                }
                if let Err(load_error) = self.load() {
                    warn!("Failed to reload {}: {}", self.root, load_error);
                }
                return Err(e.into());
            }
            debug!("Unmounted {}", dataset);
            unmounted.push(dataset);
        }

        self.load()
    }

    /// Unmount and destroy the whole tree, then remove the empty directories.
    pub fn destroy(mut self) -> Result<()> {
        self.unmount()?;
        self.adapter.destroy(&self.root, true)?;
        info!("Destroyed {}", self.root);

        remove_if_present(fs::remove_dir(self.path.join(CLONES_DIR)))?;
        remove_if_present(fs::remove_dir(&self.path))?;
        remove_if_present(fs::remove_file(ManagerLock::lock_path(&self.path)?))?;
        Ok(())
    }

    fn index_of(&self, id: CloneId) -> Option<usize> {
        self.clones.binary_search_by_key(&id, |clone| clone.id).ok()
    }

    /// All clones in id order.
    pub fn clones(&self) -> &[ManagedClone] {
        &self.clones
    }

    pub fn active_clone(&self) -> Option<&ManagedClone> {
        self.active.map(|index| &self.clones[index])
    }

    /// Clones before the active one; empty without an active clone.
    pub fn older_clones(&self) -> &[ManagedClone] {
        match self.active {
            Some(index) => &self.clones[..index],
            None => &[],
        }
    }

    /// Clones after the active one; empty without an active clone.
    pub fn newer_clones(&self) -> &[ManagedClone] {
        match self.active {
            Some(index) => &self.clones[index + 1..],
            None => &[],
        }
    }

    pub fn get(&self, id: CloneId) -> Option<&ManagedClone> {
        self.index_of(id).map(|index| &self.clones[index])
    }

    pub fn next_id(&self) -> CloneId {
        self.next_id
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> ManagerInfo {
        ManagerInfo {
            root: self.root.clone(),
            path: self.path.clone(),
            active: self.active_clone().map(|clone| clone.id),
            next_id: self.next_id,
            total: self.clones.len(),
            older: self.older_clones().len(),
            newer: self.newer_clones().len(),
            used_bytes: self.clones.iter().map(|clone| clone.used_bytes).sum(),
        }
    }
}

fn is_yes(value: Option<&str>) -> bool {
    value == Some("yes")
}

fn is_descendant(name: &str, root: &str) -> bool {
    name.strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn remove_if_present(result: io::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => Ok(other?),
    }
}
