// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use crate::error::Result;

/// Dataset type filter for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetType {
    Filesystem,
    Volume,
    Snapshot,
    All,
}

impl DatasetType {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetType::Filesystem => "filesystem",
            DatasetType::Volume => "volume",
            DatasetType::Snapshot => "snapshot",
            DatasetType::All => "all",
        }
    }

    /// Whether a dataset whose `type` property is `value` passes this filter.
    pub fn matches(self, value: &str) -> bool {
        self == DatasetType::All || self.as_str() == value
    }
}

/// One listed dataset, keyed by property name.
///
/// Properties reported as `-` (no value) are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyRow {
    values: BTreeMap<String, String>,
}

impl PropertyRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.values.insert(property.into(), value.into());
    }

    pub fn with(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(property, value);
        self
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.values.get(property).map(String::as_str)
    }

    /// The `name` property; empty when the listing did not request it.
    pub fn name(&self) -> &str {
        self.get("name").unwrap_or_default()
    }
}

/// Capability surface over a ZFS installation.
///
/// Every call may fail; failures carry the command and the tool's message.
pub trait ZfsAdapter {
    /// List datasets at `root` (or every dataset when `None`), in hierarchy order.
    fn list(
        &self,
        root: Option<&str>,
        kind: DatasetType,
        properties: &[&str],
        recursive: bool,
    ) -> Result<Vec<PropertyRow>>;

    /// Whether a dataset or snapshot named `name` exists.
    fn exists(&self, name: &str) -> Result<bool>;

    /// Create a filesystem with local property overrides.
    fn create(
        &self,
        name: &str,
        properties: &[(&str, &str)],
        parents: bool,
        mount: bool,
    ) -> Result<()>;

    fn destroy(&self, name: &str, recursive: bool) -> Result<()>;

    /// Create filesystem `name` from `snapshot`.
    fn clone_snapshot(&self, snapshot: &str, name: &str) -> Result<()>;

    /// Snapshot `dataset` as `{dataset}@{name}` and return the full snapshot name.
    fn snapshot(&self, dataset: &str, name: &str) -> Result<String>;

    fn promote(&self, dataset: &str) -> Result<()>;

    fn rename(&self, old: &str, new: &str) -> Result<()>;

    fn mount(&self, dataset: &str) -> Result<()>;

    fn unmount(&self, dataset: &str) -> Result<()>;

    fn set(&self, dataset: &str, property: &str, value: &str) -> Result<()>;

    /// Clear a local property so the inherited value applies again.
    fn inherit(&self, dataset: &str, property: &str) -> Result<()>;
}

impl<T: ZfsAdapter + ?Sized> ZfsAdapter for &T {
    fn list(
        &self,
        root: Option<&str>,
        kind: DatasetType,
        properties: &[&str],
        recursive: bool,
    ) -> Result<Vec<PropertyRow>> {
        (**self).list(root, kind, properties, recursive)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        (**self).exists(name)
    }

    fn create(
        &self,
        name: &str,
        properties: &[(&str, &str)],
        parents: bool,
        mount: bool,
    ) -> Result<()> {
        (**self).create(name, properties, parents, mount)
    }

    fn destroy(&self, name: &str, recursive: bool) -> Result<()> {
        (**self).destroy(name, recursive)
    }

    fn clone_snapshot(&self, snapshot: &str, name: &str) -> Result<()> {
        (**self).clone_snapshot(snapshot, name)
    }

    fn snapshot(&self, dataset: &str, name: &str) -> Result<String> {
        (**self).snapshot(dataset, name)
    }

    fn promote(&self, dataset: &str) -> Result<()> {
        (**self).promote(dataset)
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        (**self).rename(old, new)
    }

    fn mount(&self, dataset: &str) -> Result<()> {
        (**self).mount(dataset)
    }

    fn unmount(&self, dataset: &str) -> Result<()> {
        (**self).unmount(dataset)
    }

    fn set(&self, dataset: &str, property: &str, value: &str) -> Result<()> {
        (**self).set(dataset, property, value)
    }

    fn inherit(&self, dataset: &str, property: &str) -> Result<()> {
        (**self).inherit(dataset, property)
    }
}
