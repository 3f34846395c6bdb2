// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use zcm_types::RetentionLimits;
use zcm_zfs::RetryPolicy;

const APP_DIR: &str = "zfs-clone-manager";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// The level `steps` notches more verbose, saturating at trace.
    pub fn bumped(self, steps: u8) -> Self {
        let levels = [Self::Error, Self::Warn, Self::Info, Self::Debug, Self::Trace];
        let current = levels.iter().position(|level| *level == self).unwrap_or(1);
        levels[(current + steps as usize).min(levels.len() - 1)]
    }
}

/// Settings read from `config.toml`; every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Explicit `zfs` binary, otherwise looked up in PATH
    pub zfs_binary: Option<PathBuf>,
    pub command_timeout_secs: u64,
    /// Attempts for busy mount, unmount, set and inherit, the first included
    pub busy_retries: u32,
    pub busy_retry_delay_ms: u64,
    /// Take the advisory lock before changing a tree
    pub lock: bool,
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    /// Defaults for limit flags that are not given
    pub retention: RetentionLimits,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            zfs_binary: None,
            command_timeout_secs: zcm_zfs::cli::DEFAULT_TIMEOUT.as_secs(),
            busy_retries: retry.attempts,
            busy_retry_delay_ms: retry.delay.as_millis() as u64,
            lock: true,
            log_level: LoggingLevel::default(),
            log_to_disk: false,
            retention: RetentionLimits::UNBOUNDED,
        }
    }
}

impl Config {
    /// Load the first config file found, or the defaults when there is none.
    pub fn load() -> anyhow::Result<Self> {
        match config_path() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.busy_retries.max(1),
            delay: Duration::from_millis(self.busy_retry_delay_ms),
        }
    }
}

/// `$ZCM_CONFIG`, then the XDG config dir, then `/etc`; first existing wins.
fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("ZCM_CONFIG") {
        return Some(PathBuf::from(path));
    }

    let user_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));

    user_dir
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .into_iter()
        .chain(std::iter::once(Path::new("/etc").join(APP_DIR).join(CONFIG_FILE)))
        .find(|path| path.is_file())
}
