// SPDX-License-Identifier: GPL-3.0-only

//! Mount Bridge command line
//!
//! Results are printed to stdout as JSON; logs and progress go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use bridge_contracts::ProgressSink;
use bridge_types::{
    AccessMode, DriveLetter, FilesystemType, MountIdentity, MountOutcome, MountRequest, Remediation,
};
use clap::{Parser, Subcommand};
use mount_bridge::{Bridge, BridgeConfig, logging};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Mount physical disk partitions inside the Linux subsystem
#[derive(Parser)]
#[command(name = "mount-bridge", version)]
#[command(about = "Mount disk partitions inside WSL and map them to drive letters", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not print progress lines
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a partition and expose it on the host
    #[command(allow_negative_numbers = true)]
    Mount {
        /// Host disk number
        disk: i64,
        /// 1-based partition number
        partition: i64,
        /// Filesystem type, or auto to let the subsystem probe
        #[arg(long = "fs", default_value = "auto")]
        filesystem: FilesystemType,
        /// Target distribution (defaults to the configured one)
        #[arg(long)]
        distro: Option<String>,
        /// Drive letter to map the mount to
        #[arg(long, conflicts_with = "namespace")]
        letter: Option<DriveLetter>,
        /// Expose through the namespace path only
        #[arg(long)]
        namespace: bool,
    },
    /// Remove the mapping and unmount a partition
    Unmount {
        disk: u32,
        partition: u32,
        #[arg(long)]
        distro: Option<String>,
    },
    /// Map an already mounted partition to a drive letter
    Remap {
        disk: u32,
        partition: u32,
        letter: DriveLetter,
        #[arg(long)]
        distro: Option<String>,
    },
    /// Re-probe a recorded mount
    Verify { disk: u32, partition: u32 },
    /// List recorded mounts
    Status,
    /// Drop stale records and restore the current mount
    Reconcile,
    /// List physical disks
    Disks,
}

/// Outcome plus the remediation a caller should offer
#[derive(Serialize)]
struct OutcomeView<'a> {
    #[serde(flatten)]
    outcome: &'a MountOutcome,
    remediation: Remediation,
    offers_fallback: bool,
}

struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&self, message: String) {
        eprintln!("> {}", message);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

fn print_outcome(outcome: &MountOutcome) -> Result<ExitCode> {
    print_json(&OutcomeView {
        outcome,
        remediation: outcome.remediation(),
        offers_fallback: outcome.category().is_some_and(|c| c.offers_fallback()),
    })?;
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = BridgeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    logging::init(config.log_dir.as_deref(), cli.verbose);
    tracing::debug!("Mount Bridge v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let bridge = Bridge::from_config(&config, &cancel).await;
    let progress: &dyn ProgressSink = if cli.quiet {
        &bridge_contracts::NullProgress
    } else {
        &StderrProgress
    };

    match cli.command {
        Commands::Mount {
            disk,
            partition,
            filesystem,
            distro,
            letter,
            namespace,
        } => {
            let mut request = MountRequest::new(disk, partition, filesystem);
            if let Some(distro) = distro {
                request = request.with_distro(distro);
            }
            if let Some(letter) = letter {
                request = request.with_drive_letter(letter);
            }
            if namespace {
                request = request.with_access_mode(AccessMode::Namespace);
            }
            let outcome = bridge.orchestrator.mount(&request, progress, &cancel).await;
            print_outcome(&outcome)
        }
        Commands::Unmount {
            disk,
            partition,
            distro,
        } => {
            let identity = MountIdentity::new(disk, partition);
            let outcome = bridge
                .orchestrator
                .unmount(identity, distro.as_deref(), progress, &cancel)
                .await;
            print_outcome(&outcome)
        }
        Commands::Remap {
            disk,
            partition,
            letter,
            distro,
        } => {
            let identity = MountIdentity::new(disk, partition);
            let outcome = bridge
                .orchestrator
                .remap(identity, letter, distro.as_deref(), progress, &cancel)
                .await;
            print_outcome(&outcome)
        }
        Commands::Verify { disk, partition } => {
            let identity = MountIdentity::new(disk, partition);
            match bridge.orchestrator.verify(identity, &cancel).await? {
                Some(record) => {
                    print_json(&record)?;
                    Ok(if record.verified {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    })
                }
                None => {
                    tracing::error!("{} is not recorded", identity);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Status => {
            print_json(&bridge.orchestrator.status().await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reconcile => {
            let report = bridge.reconciler.reconcile(&cancel).await?;
            print_json(&report)?;
            Ok(if report.failures.is_empty() && !report.cancelled {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Disks => {
            print_json(&bridge.orchestrator.disks().await?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
