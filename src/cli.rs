use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::BootMode;

/// Blunux installer - provisions a bootable Blunux system onto a disk
#[derive(Parser, Debug)]
#[command(name = "blunux-installer")]
#[command(about = "Installs Blunux onto a target disk from a JSON configuration")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: print every command and file write instead of performing it.
    ///
    /// Read-only queries (firmware detection, `lsblk` for `disks`) still run
    /// so the preview reflects this machine.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full installation pipeline
    Install {
        /// Path to the JSON configuration record
        #[arg(short, long)]
        config: PathBuf,

        /// Target disk, overriding the configuration (e.g. /dev/nvme0n1)
        #[arg(short, long)]
        disk: Option<String>,

        /// Where the target tree is mounted
        #[arg(long, default_value = "/mnt")]
        mount_point: PathBuf,

        /// Firmware mode: auto, uefi or bios
        #[arg(long, default_value = "auto")]
        firmware: BootMode,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Print the partition layout the planner would create (no changes made)
    Plan {
        /// Disk to plan for (e.g. /dev/sda)
        #[arg(short, long)]
        disk: String,

        /// Firmware mode: auto, uefi or bios
        #[arg(long, default_value = "auto")]
        firmware: BootMode,

        /// Also resolve boot strategy, kernel and packages from this configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List candidate target disks
    Disks,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
