// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use zcm_zfs::{DatasetType, PropertyRow, Result, ZfsAdapter, ZfsError};

use crate::calls::{Call, Op};

const FIRST_CREATION: i64 = 1_600_000_000;
const DEFAULT_USED_BYTES: u64 = 96 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Filesystem,
    Volume,
}

#[derive(Debug, Clone)]
struct Dataset {
    kind: Kind,
    /// Locally set properties
    properties: BTreeMap<String, String>,
    origin: Option<String>,
    /// Snapshot short names, oldest first
    snapshots: Vec<String>,
    mounted: bool,
    creation: i64,
    used: u64,
}

impl Dataset {
    fn new(kind: Kind, creation: i64) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
            origin: None,
            snapshots: Vec::new(),
            mounted: false,
            creation,
            used: DEFAULT_USED_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: Op,
    target: String,
    message: String,
    /// `None` fails every matching call
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    datasets: BTreeMap<String, Dataset>,
    clock: i64,
    calls: Vec<Call>,
    faults: Vec<Fault>,
}

/// In-memory ZFS
///
/// Pools are plain top-level filesystems mounted at `/{pool}`. Mounting only
/// flips a flag unless `materialize_mounts` is enabled, in which case the
/// mountpoint directory is created on the host as a real mount would, and
/// removed again on unmount if it is empty.
#[derive(Debug, Default)]
pub struct MemoryZfs {
    state: Mutex<State>,
    materialize_mounts: bool,
}

fn failed(command: String, message: impl Into<String>) -> ZfsError {
    ZfsError::from_stderr(command, message.into())
}

fn parent_of(name: &str) -> Option<&str> {
    name.rsplit_once('/').map(|(parent, _)| parent)
}

fn is_within(name: &str, root: &str) -> bool {
    name == root
        || name
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl MemoryZfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the directory of every mountpoint when a dataset is mounted.
    pub fn materialize_mounts(mut self) -> Self {
        self.materialize_mounts = true;
        self
    }

    /// Add a pool (top-level filesystem), mounted at `/{name}`.
    pub fn with_pool(self, name: &str) -> Self {
        {
            let mut state = self.lock();
            let creation = state.tick();
            let mut dataset = Dataset::new(Kind::Filesystem, creation);
            // Pools are never materialized: their mountpoint would be on the host root.
            dataset.mounted = true;
            state.datasets.insert(name.to_string(), dataset);
        }
        self
    }

    /// Add a plain mounted filesystem with its missing parents.
    pub fn with_filesystem(self, name: &str) -> Self {
        self.insert_plain(name, Kind::Filesystem);
        self
    }

    /// Add a volume; volumes have no mountpoint.
    pub fn with_volume(self, name: &str) -> Self {
        self.insert_plain(name, Kind::Volume);
        self
    }

    fn insert_plain(&self, name: &str, kind: Kind) {
        let mut state = self.lock();
        let mut missing = Vec::new();
        let mut current = parent_of(name);
        while let Some(parent) = current {
            if state.datasets.contains_key(parent) {
                break;
            }
            missing.push(parent.to_string());
            current = parent_of(parent);
        }
        for parent in missing.into_iter().rev() {
            let creation = state.tick();
            let mut dataset = Dataset::new(Kind::Filesystem, creation);
            dataset.mounted = true;
            state.datasets.insert(parent, dataset);
        }
        let creation = state.tick();
        let mut dataset = Dataset::new(kind, creation);
        dataset.mounted = kind == Kind::Filesystem;
        state.datasets.insert(name.to_string(), dataset);
    }

    /// Fail the next matching call once with `message` as stderr.
    pub fn fail_next(&self, op: Op, target: &str, message: &str) {
        self.push_fault(op, target, message, Some(1));
    }

    /// Fail every matching call with `message` as stderr.
    pub fn fail_always(&self, op: Op, target: &str, message: &str) {
        self.push_fault(op, target, message, None);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn push_fault(&self, op: Op, target: &str, message: &str, remaining: Option<usize>) {
        self.lock().faults.push(Fault {
            op,
            target: target.to_string(),
            message: message.to_string(),
            remaining,
        });
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls that change state, in order.
    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn dataset_exists(&self, name: &str) -> bool {
        self.lock().datasets.contains_key(name)
    }

    pub fn snapshot_exists(&self, snapshot: &str) -> bool {
        self.lock().has_snapshot(snapshot)
    }

    /// Dataset names, parents first.
    pub fn dataset_names(&self) -> Vec<String> {
        self.lock().datasets.keys().cloned().collect()
    }

    pub fn snapshots_of(&self, name: &str) -> Vec<String> {
        self.lock()
            .datasets
            .get(name)
            .map(|dataset| dataset.snapshots.clone())
            .unwrap_or_default()
    }

    pub fn origin_of(&self, name: &str) -> Option<String> {
        self.lock()
            .datasets
            .get(name)
            .and_then(|dataset| dataset.origin.clone())
    }

    pub fn is_mounted(&self, name: &str) -> bool {
        self.lock()
            .datasets
            .get(name)
            .is_some_and(|dataset| dataset.mounted)
    }

    /// Effective value of `property`, inherited values included.
    pub fn property(&self, name: &str, property: &str) -> Option<String> {
        self.lock().resolve(name, property)
    }

    /// Whether `property` is set locally on `name`.
    pub fn has_local_property(&self, name: &str, property: &str) -> bool {
        self.lock()
            .datasets
            .get(name)
            .is_some_and(|dataset| dataset.properties.contains_key(property))
    }

    /// Set a property without going through the adapter or its checks.
    pub fn force_property(&self, name: &str, property: &str, value: &str) {
        if let Some(dataset) = self.lock().datasets.get_mut(name) {
            dataset.properties.insert(property.to_string(), value.to_string());
        }
    }

    /// Flip the mounted flag without going through the adapter.
    pub fn force_mounted(&self, name: &str, mounted: bool) {
        if let Some(dataset) = self.lock().datasets.get_mut(name) {
            dataset.mounted = mounted;
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Log the call and apply any matching fault.
    fn begin(&self, call: Call) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        debug!("{}", call);
        let command = call.to_string();
        let fault = state
            .faults
            .iter()
            .position(|fault| fault.op == call.op && fault.target == call.target);
        state.calls.push(call);

        if let Some(index) = fault {
            let message = state.faults[index].message.clone();
            match state.faults[index].remaining {
                Some(1) => {
                    state.faults.remove(index);
                }
                Some(remaining) => state.faults[index].remaining = Some(remaining - 1),
                None => {}
            }
            return Err(failed(command, message));
        }

        Ok(state)
    }

    fn materialize(&self, mountpoint: &Path, command: &str) -> Result<()> {
        if self.materialize_mounts {
            fs::create_dir_all(mountpoint).map_err(|e| {
                failed(command.to_string(), format!("cannot create mountpoint: {e}"))
            })?;
        }
        Ok(())
    }
}

impl State {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        FIRST_CREATION + self.clock
    }

    fn has_snapshot(&self, snapshot: &str) -> bool {
        let Some((dataset, name)) = snapshot.split_once('@') else {
            return false;
        };
        self.datasets
            .get(dataset)
            .is_some_and(|dataset| dataset.snapshots.iter().any(|existing| existing == name))
    }

    fn resolve(&self, name: &str, property: &str) -> Option<String> {
        let dataset = self.datasets.get(name)?;
        match property {
            "name" => Some(name.to_string()),
            "type" => Some(
                match dataset.kind {
                    Kind::Filesystem => "filesystem",
                    Kind::Volume => "volume",
                }
                .to_string(),
            ),
            "origin" => dataset.origin.clone(),
            "mounted" => Some(if dataset.mounted { "yes" } else { "no" }.to_string()),
            "creation" => Some(dataset.creation.to_string()),
            "used" => Some(dataset.used.to_string()),
            "mountpoint" => self.mountpoint(name).map(|path| path.display().to_string()),
            _ => {
                if let Some(value) = dataset.properties.get(property) {
                    return Some(value.clone());
                }
                // Only user properties inherit here.
                if property.contains(':') {
                    parent_of(name).and_then(|parent| self.resolve(parent, property))
                } else {
                    None
                }
            }
        }
    }

    fn mountpoint(&self, name: &str) -> Option<PathBuf> {
        let dataset = self.datasets.get(name)?;
        if dataset.kind == Kind::Volume {
            return None;
        }
        if let Some(local) = dataset.properties.get("mountpoint") {
            return Some(PathBuf::from(local));
        }
        match parent_of(name) {
            Some(parent) => {
                let leaf = name.rsplit('/').next().unwrap_or(name);
                self.mountpoint(parent).map(|path| path.join(leaf))
            }
            None => Some(Path::new("/").join(name)),
        }
    }

    /// Another mounted dataset already sitting on `mountpoint`.
    fn mount_conflict(&self, name: &str, mountpoint: &Path) -> Option<String> {
        self.datasets
            .iter()
            .filter(|(other, dataset)| other.as_str() != name && dataset.mounted)
            .find(|(other, _)| self.mountpoint(other).as_deref() == Some(mountpoint))
            .map(|(other, _)| other.clone())
    }

    fn require(&self, name: &str, command: &str) -> Result<&Dataset> {
        self.datasets.get(name).ok_or_else(|| {
            failed(
                command.to_string(),
                format!("cannot open '{name}': dataset does not exist"),
            )
        })
    }

    fn check_remount(&self, name: &str, command: &str) -> Result<()> {
        let mounted = self.require(name, command)?.mounted;
        if !mounted {
            return Ok(());
        }
        if let Some(mountpoint) = self.mountpoint(name)
            && let Some(other) = self.mount_conflict(name, &mountpoint)
        {
            return Err(failed(
                command.to_string(),
                format!(
                    "cannot mount '{}': mountpoint already used by '{other}'",
                    mountpoint.display()
                ),
            ));
        }
        Ok(())
    }
}

impl ZfsAdapter for MemoryZfs {
    fn list(
        &self,
        root: Option<&str>,
        kind: DatasetType,
        properties: &[&str],
        recursive: bool,
    ) -> Result<Vec<PropertyRow>> {
        let call = Call::new(Op::List, root.unwrap_or("-"));
        let command = call.to_string();
        let state = self.begin(call)?;
        if let Some(root) = root {
            state.require(root, &command)?;
        }

        let mut rows = Vec::new();
        for (name, dataset) in &state.datasets {
            let selected = match root {
                None => true,
                Some(root) if recursive => is_within(name, root),
                Some(root) => name == root,
            };
            if !selected {
                continue;
            }

            let type_name = match dataset.kind {
                Kind::Filesystem => "filesystem",
                Kind::Volume => "volume",
            };
            if kind.matches(type_name) {
                let mut row = PropertyRow::new();
                for property in properties {
                    if let Some(value) = state.resolve(name, property) {
                        row.insert(*property, value);
                    }
                }
                rows.push(row);
            }

            if matches!(kind, DatasetType::Snapshot | DatasetType::All) {
                for snapshot in &dataset.snapshots {
                    let mut row = PropertyRow::new();
                    for property in properties {
                        match *property {
                            "name" => row.insert("name", format!("{name}@{snapshot}")),
                            "type" => row.insert("type", "snapshot"),
                            _ => {}
                        }
                    }
                    rows.push(row);
                }
            }
        }

        Ok(rows)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let state = self.begin(Call::new(Op::Exists, name))?;
        Ok(state.datasets.contains_key(name) || state.has_snapshot(name))
    }

    fn create(
        &self,
        name: &str,
        properties: &[(&str, &str)],
        parents: bool,
        mount: bool,
    ) -> Result<()> {
        let call = Call::new(Op::Create, name);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        if state.datasets.contains_key(name) {
            return Err(failed(command, format!("cannot create '{name}': dataset already exists")));
        }
        let Some(parent) = parent_of(name) else {
            return Err(failed(command, format!("cannot create '{name}': missing dataset name")));
        };
        if !state.datasets.contains_key(parent) {
            if !parents {
                return Err(failed(
                    command,
                    format!("cannot create '{name}': parent does not exist"),
                ));
            }
            let mut missing = Vec::new();
            let mut current = Some(parent);
            while let Some(ancestor) = current {
                if state.datasets.contains_key(ancestor) {
                    break;
                }
                missing.push(ancestor.to_string());
                current = parent_of(ancestor);
            }
            if current.is_none() {
                return Err(failed(command, format!("cannot create '{name}': no such pool")));
            }
            for ancestor in missing.into_iter().rev() {
                let creation = state.tick();
                state
                    .datasets
                    .insert(ancestor, Dataset::new(Kind::Filesystem, creation));
            }
        }

        let creation = state.tick();
        let mut dataset = Dataset::new(Kind::Filesystem, creation);
        for (property, value) in properties {
            dataset
                .properties
                .insert(property.to_string(), value.to_string());
        }
        state.datasets.insert(name.to_string(), dataset);

        if mount {
            let mountpoint = state.mountpoint(name).unwrap_or_default();
            if let Some(other) = state.mount_conflict(name, &mountpoint) {
                return Err(failed(
                    command,
                    format!("filesystem successfully created, but not mounted: '{other}' uses the mountpoint"),
                ));
            }
            self.materialize(&mountpoint, &command)?;
            if let Some(dataset) = state.datasets.get_mut(name) {
                dataset.mounted = true;
            }
        }
        Ok(())
    }

    fn destroy(&self, name: &str, recursive: bool) -> Result<()> {
        let call = Call::new(Op::Destroy, name);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        if let Some((dataset_name, snapshot)) = name.split_once('@') {
            if !state.has_snapshot(name) {
                return Err(failed(
                    command,
                    format!("could not find any snapshots to destroy; check snapshot names: '{name}'"),
                ));
            }
            if let Some((dependent, _)) = state
                .datasets
                .iter()
                .find(|(_, dataset)| dataset.origin.as_deref() == Some(name))
            {
                return Err(failed(
                    command,
                    format!("cannot destroy '{name}': snapshot has dependent clones ('{dependent}')"),
                ));
            }
            if let Some(dataset) = state.datasets.get_mut(dataset_name) {
                dataset.snapshots.retain(|existing| existing != snapshot);
            }
            return Ok(());
        }

        let dataset = state.require(name, &command)?;
        let has_children = state
            .datasets
            .keys()
            .any(|other| other != name && is_within(other, name));
        if !recursive && (has_children || !dataset.snapshots.is_empty()) {
            return Err(failed(
                command,
                format!("cannot destroy '{name}': filesystem has children"),
            ));
        }

        let doomed: Vec<String> = state
            .datasets
            .keys()
            .filter(|other| is_within(other, name))
            .cloned()
            .collect();
        let outside_dependent = state.datasets.iter().find(|(other, dataset)| {
            !is_within(other, name)
                && dataset.origin.as_deref().is_some_and(|origin| {
                    origin
                        .split_once('@')
                        .is_some_and(|(owner, _)| is_within(owner, name))
                })
        });
        if let Some((dependent, _)) = outside_dependent {
            return Err(failed(
                command,
                format!("cannot destroy '{name}': filesystem has dependent clones ('{dependent}')"),
            ));
        }

        for doomed_name in doomed {
            state.datasets.remove(&doomed_name);
        }
        Ok(())
    }

    fn clone_snapshot(&self, snapshot: &str, name: &str) -> Result<()> {
        let call = Call::new(Op::Clone, name).with_detail(snapshot);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        if !state.has_snapshot(snapshot) {
            return Err(failed(
                command,
                format!("cannot open '{snapshot}': dataset does not exist"),
            ));
        }
        if state.datasets.contains_key(name) {
            return Err(failed(command, format!("cannot create '{name}': dataset already exists")));
        }
        match parent_of(name) {
            Some(parent) if state.datasets.contains_key(parent) => {}
            _ => {
                return Err(failed(
                    command,
                    format!("cannot create '{name}': parent does not exist"),
                ));
            }
        }

        let creation = state.tick();
        let mut dataset = Dataset::new(Kind::Filesystem, creation);
        dataset.origin = Some(snapshot.to_string());
        state.datasets.insert(name.to_string(), dataset);

        let mountpoint = state.mountpoint(name).unwrap_or_default();
        if state.mount_conflict(name, &mountpoint).is_none() {
            self.materialize(&mountpoint, &command)?;
            if let Some(dataset) = state.datasets.get_mut(name) {
                dataset.mounted = true;
            }
        }
        Ok(())
    }

    fn snapshot(&self, dataset: &str, name: &str) -> Result<String> {
        let call = Call::new(Op::Snapshot, dataset).with_detail(name);
        let command = call.to_string();
        let mut state = self.begin(call)?;
        let snapshot = format!("{dataset}@{name}");

        state.require(dataset, &command)?;
        if state.has_snapshot(&snapshot) {
            return Err(failed(
                command,
                format!("cannot create snapshot '{snapshot}': dataset already exists"),
            ));
        }
        if let Some(entry) = state.datasets.get_mut(dataset) {
            entry.snapshots.push(name.to_string());
        }
        Ok(snapshot)
    }

    fn promote(&self, dataset: &str) -> Result<()> {
        let call = Call::new(Op::Promote, dataset);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        let Some(origin) = state.require(dataset, &command)?.origin.clone() else {
            return Err(failed(
                command,
                format!("cannot promote '{dataset}': not a cloned filesystem"),
            ));
        };
        let Some((parent, pivot)) = origin.split_once('@') else {
            return Err(failed(command, format!("invalid origin '{origin}'")));
        };
        let parent_entry = state.require(parent, &command)?;
        let Some(index) = parent_entry
            .snapshots
            .iter()
            .position(|snapshot| snapshot == pivot)
        else {
            return Err(failed(command, format!("origin '{origin}' does not exist")));
        };
        let moved: Vec<String> = parent_entry.snapshots[..=index].to_vec();
        let parent_origin = parent_entry.origin.clone();

        let promoted_snapshots = &state.require(dataset, &command)?.snapshots;
        if let Some(conflict) = moved
            .iter()
            .find(|snapshot| promoted_snapshots.contains(snapshot))
        {
            return Err(failed(
                command,
                format!("cannot promote '{dataset}': conflicting snapshot '{conflict}'"),
            ));
        }

        // Snapshots up to the origin move to the promoted dataset, dependents follow.
        let remapped: Vec<(String, String)> = moved
            .iter()
            .map(|snapshot| (format!("{parent}@{snapshot}"), format!("{dataset}@{snapshot}")))
            .collect();
        for (other, entry) in state.datasets.iter_mut() {
            if other == dataset {
                continue;
            }
            if let Some(current) = entry.origin.as_deref()
                && let Some((_, to)) = remapped.iter().find(|(from, _)| from == current)
            {
                entry.origin = Some(to.clone());
            }
        }

        if let Some(parent_entry) = state.datasets.get_mut(parent) {
            parent_entry.snapshots.drain(..=index);
            parent_entry.origin = Some(format!("{dataset}@{pivot}"));
        }
        if let Some(entry) = state.datasets.get_mut(dataset) {
            let mut snapshots = moved;
            snapshots.append(&mut entry.snapshots);
            entry.snapshots = snapshots;
            entry.origin = parent_origin;
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let call = Call::new(Op::Rename, old).with_detail(new);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        state.require(old, &command)?;
        if state.datasets.contains_key(new) {
            return Err(failed(
                command,
                format!("cannot rename to '{new}': dataset already exists"),
            ));
        }
        if is_within(new, old) {
            return Err(failed(
                command,
                format!("cannot rename to '{new}': new dataset name cannot be a descendant of current dataset name"),
            ));
        }
        match parent_of(new) {
            Some(parent) if state.datasets.contains_key(parent) => {}
            _ => {
                return Err(failed(
                    command,
                    format!("cannot rename to '{new}': parent does not exist"),
                ));
            }
        }

        let moved: Vec<String> = state
            .datasets
            .keys()
            .filter(|name| is_within(name, old))
            .cloned()
            .collect();
        for name in moved {
            if let Some(dataset) = state.datasets.remove(&name) {
                let renamed = format!("{new}{}", &name[old.len()..]);
                state.datasets.insert(renamed, dataset);
            }
        }
        for dataset in state.datasets.values_mut() {
            if let Some(origin) = dataset.origin.as_deref()
                && let Some((owner, snapshot)) = origin.split_once('@')
                && is_within(owner, old)
            {
                dataset.origin = Some(format!("{new}{}@{snapshot}", &owner[old.len()..]));
            }
        }
        Ok(())
    }

    fn mount(&self, dataset: &str) -> Result<()> {
        let call = Call::new(Op::Mount, dataset);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        let entry = state.require(dataset, &command)?;
        if entry.kind == Kind::Volume {
            return Err(failed(command, format!("cannot mount '{dataset}': not a filesystem")));
        }
        if entry.mounted {
            return Err(failed(
                command,
                format!("cannot mount '{dataset}': filesystem already mounted"),
            ));
        }
        let mountpoint = state.mountpoint(dataset).unwrap_or_default();
        if let Some(other) = state.mount_conflict(dataset, &mountpoint) {
            return Err(failed(
                command,
                format!(
                    "cannot mount '{}': mountpoint already used by '{other}'",
                    mountpoint.display()
                ),
            ));
        }
        self.materialize(&mountpoint, &command)?;
        if let Some(entry) = state.datasets.get_mut(dataset) {
            entry.mounted = true;
        }
        Ok(())
    }

    fn unmount(&self, dataset: &str) -> Result<()> {
        let call = Call::new(Op::Unmount, dataset);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        if !state.require(dataset, &command)?.mounted {
            return Err(failed(
                command,
                format!("cannot unmount '{dataset}': not currently mounted"),
            ));
        }
        let mountpoint = state.mountpoint(dataset).unwrap_or_default();
        let nested = state.datasets.iter().any(|(other, entry)| {
            other != dataset
                && entry.mounted
                && state
                    .mountpoint(other)
                    .is_some_and(|path| path != mountpoint && path.starts_with(&mountpoint))
        });
        if nested {
            return Err(failed(
                command,
                format!("cannot unmount '{}': pool or dataset is busy", mountpoint.display()),
            ));
        }
        if let Some(entry) = state.datasets.get_mut(dataset) {
            entry.mounted = false;
        }
        if self.materialize_mounts {
            // Like zfs, drop the mountpoint directory when nothing is left in it.
            let _ = fs::remove_dir(&mountpoint);
        }
        Ok(())
    }

    fn set(&self, dataset: &str, property: &str, value: &str) -> Result<()> {
        let call = Call::new(Op::Set, dataset).with_detail(format!("{property}={value}"));
        let command = call.to_string();
        let mut state = self.begin(call)?;

        state.require(dataset, &command)?;
        let previous = state
            .datasets
            .get_mut(dataset)
            .and_then(|entry| entry.properties.insert(property.to_string(), value.to_string()));

        if property == "mountpoint"
            && let Err(error) = state.check_remount(dataset, &command)
        {
            if let Some(entry) = state.datasets.get_mut(dataset) {
                match previous {
                    Some(previous) => entry.properties.insert(property.to_string(), previous),
                    None => entry.properties.remove(property),
                };
            }
            return Err(error);
        }
        Ok(())
    }

    fn inherit(&self, dataset: &str, property: &str) -> Result<()> {
        let call = Call::new(Op::Inherit, dataset).with_detail(property);
        let command = call.to_string();
        let mut state = self.begin(call)?;

        state.require(dataset, &command)?;
        let previous = state
            .datasets
            .get_mut(dataset)
            .and_then(|entry| entry.properties.remove(property));

        if property == "mountpoint"
            && let Err(error) = state.check_remount(dataset, &command)
        {
            if let (Some(entry), Some(previous)) = (state.datasets.get_mut(dataset), previous) {
                entry.properties.insert(property.to_string(), previous);
            }
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zfs() -> MemoryZfs {
        MemoryZfs::new().with_pool("tank")
    }

    #[test]
    fn mountpoints_inherit_through_the_tree() {
        let zfs = zfs();
        zfs.create("tank/zcm", &[("mountpoint", "/srv/app/.clones")], false, true)
            .unwrap();
        zfs.create("tank/zcm/00000000", &[], false, false).unwrap();

        assert_eq!(
            zfs.property("tank/zcm/00000000", "mountpoint").as_deref(),
            Some("/srv/app/.clones/00000000")
        );
        assert_eq!(zfs.property("tank", "mountpoint").as_deref(), Some("/tank"));
        assert!(!zfs.is_mounted("tank/zcm/00000000"));
    }

    #[test]
    fn user_properties_inherit_but_native_ones_do_not() {
        let zfs = zfs();
        zfs.create(
            "tank/zcm",
            &[("zfs_clone_manager:path", "/srv/app"), ("compression", "lz4")],
            false,
            false,
        )
        .unwrap();
        zfs.create("tank/zcm/child", &[], false, false).unwrap();

        assert_eq!(
            zfs.property("tank/zcm/child", "zfs_clone_manager:path").as_deref(),
            Some("/srv/app")
        );
        assert_eq!(zfs.property("tank/zcm/child", "compression"), None);
    }

    #[test]
    fn promote_swaps_snapshot_ownership() {
        let zfs = zfs();
        zfs.create("tank/a", &[], false, false).unwrap();
        zfs.snapshot("tank/a", "1").unwrap();
        zfs.clone_snapshot("tank/a@1", "tank/b").unwrap();
        zfs.snapshot("tank/a", "2").unwrap();
        zfs.clone_snapshot("tank/a@2", "tank/c").unwrap();

        zfs.promote("tank/c").unwrap();

        assert_eq!(zfs.snapshots_of("tank/c"), vec!["1", "2"]);
        assert!(zfs.snapshots_of("tank/a").is_empty());
        assert_eq!(zfs.origin_of("tank/a").as_deref(), Some("tank/c@2"));
        assert_eq!(zfs.origin_of("tank/b").as_deref(), Some("tank/c@1"));
        assert_eq!(zfs.origin_of("tank/c"), None);
    }

    #[test]
    fn snapshots_with_dependents_cannot_be_destroyed() {
        let zfs = zfs();
        zfs.create("tank/a", &[], false, false).unwrap();
        zfs.snapshot("tank/a", "1").unwrap();
        zfs.clone_snapshot("tank/a@1", "tank/b").unwrap();

        assert!(zfs.destroy("tank/a@1", false).is_err());
        assert!(zfs.destroy("tank/a", false).is_err());
        zfs.destroy("tank/b", false).unwrap();
        zfs.destroy("tank/a@1", false).unwrap();
        zfs.destroy("tank/a", false).unwrap();
    }

    #[test]
    fn refuses_two_mounts_on_one_path() {
        let zfs = zfs();
        zfs.create("tank/a", &[("mountpoint", "/srv/app")], false, true).unwrap();
        zfs.create("tank/b", &[], false, true).unwrap();

        assert!(zfs.set("tank/b", "mountpoint", "/srv/app").is_err());
        assert_eq!(zfs.property("tank/b", "mountpoint").as_deref(), Some("/tank/b"));

        zfs.unmount("tank/b").unwrap();
        zfs.set("tank/b", "mountpoint", "/srv/app").unwrap();
        assert!(zfs.mount("tank/b").is_err());
    }

    #[test]
    fn nested_mounts_keep_parent_busy() {
        let zfs = zfs();
        zfs.create("tank/a", &[("mountpoint", "/srv/app")], false, true).unwrap();
        zfs.create("tank/b", &[("mountpoint", "/srv/app/.clones")], false, true)
            .unwrap();

        let error = zfs.unmount("tank/a").unwrap_err();
        assert!(error.is_busy());
        zfs.unmount("tank/b").unwrap();
        zfs.unmount("tank/a").unwrap();
    }

    #[test]
    fn rename_moves_children_and_origins() {
        let zfs = zfs();
        zfs.create("tank/a", &[], false, false).unwrap();
        zfs.create("tank/a/x", &[], false, false).unwrap();
        zfs.snapshot("tank/a/x", "s").unwrap();
        zfs.clone_snapshot("tank/a/x@s", "tank/c").unwrap();

        zfs.rename("tank/a", "tank/b").unwrap();

        assert!(zfs.dataset_exists("tank/b/x"));
        assert!(!zfs.dataset_exists("tank/a"));
        assert_eq!(zfs.origin_of("tank/c").as_deref(), Some("tank/b/x@s"));
    }

    #[test]
    fn faults_fire_once_and_are_logged() {
        let zfs = zfs();
        zfs.create("tank/a", &[], false, true).unwrap();
        zfs.fail_next(Op::Unmount, "tank/a", "device is busy");

        assert!(zfs.unmount("tank/a").unwrap_err().is_busy());
        zfs.unmount("tank/a").unwrap();

        let unmounts: Vec<_> = zfs
            .calls()
            .into_iter()
            .filter(|call| call.op == Op::Unmount)
            .collect();
        assert_eq!(unmounts.len(), 2);
    }

    #[test]
    fn materialized_mounts_create_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mountpoint = dir.path().join("app");
        let zfs = MemoryZfs::new().materialize_mounts().with_pool("tank");

        zfs.create(
            "tank/a",
            &[("mountpoint", mountpoint.to_str().unwrap())],
            false,
            true,
        )
        .unwrap();

        assert!(mountpoint.is_dir());
    }
}
