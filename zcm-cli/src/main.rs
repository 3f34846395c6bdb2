// SPDX-License-Identifier: GPL-3.0-only

mod config;
mod logging;
mod output;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use zcm::{CloneId, Manager, ManagerInfo, ManagerLock, RetentionLimits, ZfsCli};

use crate::config::Config;

/// Manage a chain of ZFS clones mounted one at a time at a directory
#[derive(Parser)]
#[command(name = "zcm", version)]
#[command(about = "Manage ZFS clones of a directory, boot-environment style", long_about = None)]
struct Cli {
    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// More log output; repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy, Debug, Default)]
struct LimitArgs {
    /// Keep at most this many clones older than the active one
    #[arg(long)]
    max_older: Option<usize>,
    /// Keep at most this many clones newer than the active one
    #[arg(long)]
    max_newer: Option<usize>,
    /// Keep at most this many clones in total
    #[arg(long)]
    max_total: Option<usize>,
}

impl From<LimitArgs> for RetentionLimits {
    fn from(args: LimitArgs) -> Self {
        RetentionLimits {
            max_older: args.max_older,
            max_newer: args.max_newer,
            max_total: args.max_total,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Put a directory under management
    Init {
        /// Dataset that will hold the clones
        root: String,
        /// Directory the active clone is mounted at
        path: PathBuf,
        /// Move existing content or an existing dataset into the first clone
        #[arg(long)]
        migrate: bool,
    },
    /// Snapshot the active clone into a new clone
    #[command(alias = "create")]
    Clone {
        path: PathBuf,
        #[command(flatten)]
        limits: LimitArgs,
        /// Remove clones beyond the limits afterwards
        #[arg(long)]
        auto_remove: bool,
    },
    /// Mount another clone at the managed path
    Activate {
        path: PathBuf,
        id: CloneId,
        #[command(flatten)]
        limits: LimitArgs,
        /// Remove clones beyond the limits afterwards
        #[arg(long)]
        auto_remove: bool,
    },
    /// Remove inactive clones
    #[command(alias = "rm")]
    Remove {
        path: PathBuf,
        #[arg(required = true)]
        ids: Vec<CloneId>,
    },
    /// Remove clones until the limits hold
    Prune {
        path: PathBuf,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// List the clones of a managed path
    #[command(alias = "ls")]
    List { path: PathBuf },
    /// Summarize one managed path, or every one found
    Info { path: Option<PathBuf> },
    /// Mount every dataset of a managed path
    Mount { path: PathBuf },
    /// Unmount every dataset of a managed path
    Unmount { path: PathBuf },
    /// Destroy the whole tree, every clone included
    Destroy {
        path: PathBuf,
        /// Confirm destruction
        #[arg(long)]
        yes: bool,
    },
}

impl Commands {
    fn path_mut(&mut self) -> Option<&mut PathBuf> {
        match self {
            Commands::Init { path, .. }
            | Commands::Clone { path, .. }
            | Commands::Activate { path, .. }
            | Commands::Remove { path, .. }
            | Commands::Prune { path, .. }
            | Commands::List { path }
            | Commands::Mount { path }
            | Commands::Unmount { path }
            | Commands::Destroy { path, .. } => Some(path),
            Commands::Info { path } => path.as_mut(),
        }
    }

    /// The managed path a mutating command works on.
    fn locked_path(&self) -> Option<&Path> {
        match self {
            Commands::Init { path, .. }
            | Commands::Clone { path, .. }
            | Commands::Activate { path, .. }
            | Commands::Remove { path, .. }
            | Commands::Prune { path, .. }
            | Commands::Mount { path }
            | Commands::Unmount { path }
            | Commands::Destroy { path, .. } => Some(path),
            Commands::List { .. } | Commands::Info { .. } => None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    logging::init(&config, cli.verbose);

    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } != 0 {
        warn!("not running as root, zfs commands may fail");
    }

    let zfs = zfs_cli(&config)?;

    let mut command = cli.command;
    prepare_path(&mut command)?;

    let _lock = match command.locked_path() {
        Some(path) if config.lock => Some(
            ManagerLock::acquire(path)
                .with_context(|| format!("locking {}", path.display()))?,
        ),
        _ => None,
    };

    run(command, cli.json, &config, zfs)
}

/// Make the managed path absolute, and let `init` create its parent so the
/// lock file has somewhere to live.
fn prepare_path(command: &mut Commands) -> Result<()> {
    let is_init = matches!(command, Commands::Init { .. });
    let Some(path) = command.path_mut() else {
        return Ok(());
    };

    let absolute = std::path::absolute(&*path)
        .with_context(|| format!("resolving {}", path.display()))?;
    *path = absolute;
    if is_init && let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

fn zfs_cli(config: &Config) -> Result<ZfsCli> {
    let zfs = match &config.zfs_binary {
        Some(binary) if binary.components().count() == 1 => {
            let resolved = which::which(binary)
                .with_context(|| format!("locating {}", binary.display()))?;
            ZfsCli::with_binary(resolved)
        }
        Some(binary) => ZfsCli::with_binary(binary),
        None => ZfsCli::new()?,
    };
    Ok(zfs.timeout(config.timeout()).retry(config.retry()))
}

fn run(command: Commands, json: bool, config: &Config, zfs: ZfsCli) -> Result<()> {
    let limits = |args: LimitArgs| RetentionLimits::from(args).or(config.retention);

    match command {
        Commands::Init {
            root,
            path,
            migrate,
        } => {
            let manager = Manager::bootstrap(zfs, root, path, migrate)?;
            info!("Managing {} with {}", manager.path().display(), manager.root());
            print_info(json, &manager.info())?;
        }
        Commands::Clone {
            path,
            limits: args,
            auto_remove,
        } => {
            let mut manager = Manager::open(zfs, path)?;
            let created = manager.clone(limits(args), auto_remove)?;
            if json {
                print_json(&created)?;
            } else {
                println!("{}", created.id);
            }
        }
        Commands::Activate {
            path,
            id,
            limits: args,
            auto_remove,
        } => {
            let mut manager = Manager::open(zfs, path)?;
            manager.activate(id, limits(args), auto_remove)?;
            print_clones(json, &manager)?;
        }
        Commands::Remove { path, ids } => {
            let mut manager = Manager::open(zfs, path)?;
            for id in ids {
                manager.remove(id)?;
                if !json {
                    println!("{id}");
                }
            }
            if json {
                print_clones(json, &manager)?;
            }
        }
        Commands::Prune {
            path,
            limits: args,
        } => {
            let mut manager = Manager::open(zfs, path)?;
            let removed = manager.auto_remove(limits(args))?;
            if json {
                print_json(&removed)?;
            } else {
                for id in removed {
                    println!("{id}");
                }
            }
        }
        Commands::List { path } => {
            let manager = Manager::open(zfs, path)?;
            print_clones(json, &manager)?;
        }
        Commands::Info { path: Some(path) } => {
            let manager = Manager::open(zfs, path)?;
            print_info(json, &manager.info())?;
        }
        Commands::Info { path: None } => {
            let mut infos = Vec::new();
            for managed in Manager::managers(&zfs)? {
                match Manager::load_root(&zfs, managed.root.as_str(), managed.path.as_path()) {
                    Ok(manager) => infos.push(manager.info()),
                    Err(e) => warn!("Skipping {}: {}", managed.root, e),
                }
            }
            if json {
                print_json(&infos)?;
            } else {
                for info in &infos {
                    print!("{}", output::manager_summary(info));
                }
            }
        }
        Commands::Mount { path } => {
            let mut manager = Manager::open(zfs, path)?;
            manager.mount()?;
            print_clones(json, &manager)?;
        }
        Commands::Unmount { path } => {
            let mut manager = Manager::open(zfs, path)?;
            manager.unmount()?;
            print_clones(json, &manager)?;
        }
        Commands::Destroy { path, yes } => {
            if !yes {
                bail!(
                    "refusing to destroy {} and every clone under it without --yes",
                    path.display()
                );
            }
            let manager = Manager::open(zfs, path)?;
            let root = manager.root().to_string();
            manager.destroy()?;
            info!("Destroyed {}", root);
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_clones(json: bool, manager: &Manager<ZfsCli>) -> Result<()> {
    if json {
        print_json(manager.clones())
    } else {
        let active = manager.active_clone().map(|clone| clone.id);
        print!("{}", output::clone_table(manager.clones(), active));
        Ok(())
    }
}

fn print_info(json: bool, info: &ManagerInfo) -> Result<()> {
    if json {
        print_json(info)
    } else {
        print!("{}", output::manager_summary(info));
        Ok(())
    }
}
