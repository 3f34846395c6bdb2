// SPDX-License-Identifier: GPL-3.0-only

//! `ZfsAdapter` backed by the host `zfs` command-line tool

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use which::which;

use crate::adapter::{DatasetType, PropertyRow, ZfsAdapter};
use crate::command::{self, CommandOutcome};
use crate::error::{Result, ZfsError};
use crate::parse::{is_missing_dataset, parse_list_output};

/// Default per-invocation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Retry policy for transient busy failures.
///
/// Applies to mount, unmount, set and inherit only. Destructive calls are
/// never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        attempts: 1,
        delay: Duration::ZERO,
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// ZFS CLI wrapper
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary_path: PathBuf,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ZfsCli {
    /// Create a wrapper around the `zfs` binary found in PATH
    pub fn new() -> Result<Self> {
        let binary_path = Self::find_zfs_binary()?;
        info!("Found zfs binary at {:?}", binary_path);
        Ok(Self::with_binary(binary_path))
    }

    pub fn with_binary(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn find_zfs_binary() -> Result<PathBuf> {
        which("zfs").map_err(|e| ZfsError::BinaryNotFound(e.to_string()))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn run(&self, args: Vec<String>) -> Result<CommandOutcome> {
        command::run(&self.binary_path, &args, self.timeout)
    }

    fn run_retrying(&self, args: Vec<String>) -> Result<CommandOutcome> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run(args.clone()) {
                Err(error) if error.is_busy() && attempt < attempts => {
                    warn!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        error, attempt, attempts, self.retry.delay
                    );
                    thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn args<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl ZfsAdapter for ZfsCli {
    fn list(
        &self,
        root: Option<&str>,
        kind: DatasetType,
        properties: &[&str],
        recursive: bool,
    ) -> Result<Vec<PropertyRow>> {
        let mut list_args = args(["list", "-H", "-p", "-o"]);
        list_args.push(properties.join(","));
        list_args.push("-t".to_string());
        list_args.push(kind.as_str().to_string());
        if recursive {
            list_args.push("-r".to_string());
        }
        if let Some(root) = root {
            list_args.push(root.to_string());
        }

        let outcome = self.run(list_args)?;
        let rows = parse_list_output(&outcome.stdout, properties)?;
        debug!("Listed {} datasets", rows.len());
        Ok(rows)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        match self.run(args(["list", "-H", "-o", "name", "-t", "all", name])) {
            Ok(_) => Ok(true),
            Err(ZfsError::CommandFailed { stderr, .. }) if is_missing_dataset(&stderr) => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn create(
        &self,
        name: &str,
        properties: &[(&str, &str)],
        parents: bool,
        mount: bool,
    ) -> Result<()> {
        let mut create_args = args(["create"]);
        if parents {
            create_args.push("-p".to_string());
        }
        if !mount {
            create_args.push("-u".to_string());
        }
        for (property, value) in properties {
            create_args.push("-o".to_string());
            create_args.push(format!("{property}={value}"));
        }
        create_args.push(name.to_string());

        self.run(create_args)?;
        Ok(())
    }

    fn destroy(&self, name: &str, recursive: bool) -> Result<()> {
        let destroy_args = if recursive {
            args(["destroy", "-r", name])
        } else {
            args(["destroy", name])
        };
        self.run(destroy_args)?;
        Ok(())
    }

    fn clone_snapshot(&self, snapshot: &str, name: &str) -> Result<()> {
        self.run(args(["clone", snapshot, name]))?;
        Ok(())
    }

    fn snapshot(&self, dataset: &str, name: &str) -> Result<String> {
        let snapshot = format!("{dataset}@{name}");
        self.run(args(["snapshot", snapshot.as_str()]))?;
        Ok(snapshot)
    }

    fn promote(&self, dataset: &str) -> Result<()> {
        self.run(args(["promote", dataset]))?;
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.run(args(["rename", old, new]))?;
        Ok(())
    }

    fn mount(&self, dataset: &str) -> Result<()> {
        self.run_retrying(args(["mount", dataset]))?;
        Ok(())
    }

    fn unmount(&self, dataset: &str) -> Result<()> {
        self.run_retrying(args(["unmount", dataset]))?;
        Ok(())
    }

    fn set(&self, dataset: &str, property: &str, value: &str) -> Result<()> {
        let assignment = format!("{property}={value}");
        self.run_retrying(args(["set", assignment.as_str(), dataset]))?;
        Ok(())
    }

    fn inherit(&self, dataset: &str, property: &str) -> Result<()> {
        self.run_retrying(args(["inherit", property, dataset]))?;
        Ok(())
    }
}
