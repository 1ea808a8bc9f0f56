//! Block device tools: enumeration, teardown, partitioning.

use crate::tool_args::ToolArgs;

/// `lsblk` queries used by the installer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lsblk {
    /// Every node under a disk as raw `PATH TYPE [MOUNTPOINT]` rows, disk first
    Tree { disk: String },
    /// Whole-device enumeration feed: `NAME SIZE MODEL TYPE`
    Disks,
}

impl ToolArgs for Lsblk {
    fn program(&self) -> &'static str {
        "lsblk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Tree { disk } => vec![
                "-rnp".to_string(),
                "-o".to_string(),
                "NAME,TYPE,MOUNTPOINT".to_string(),
                disk.clone(),
            ],
            Self::Disks => vec![
                "-d".to_string(),
                "-n".to_string(),
                "-o".to_string(),
                "NAME,SIZE,MODEL,TYPE".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Umount {
    pub target: String,
    /// `-f`: force, for stale holders before partitioning
    pub force: bool,
    /// `-R`: recursive, for tearing down the whole target tree
    pub recursive: bool,
}

impl ToolArgs for Umount {
    fn program(&self) -> &'static str {
        "umount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.force {
            args.push("-f".to_string());
        }
        if self.recursive {
            args.push("-R".to_string());
        }
        args.push(self.target.clone());
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Swapoff {
    pub device: String,
}

impl ToolArgs for Swapoff {
    fn program(&self) -> &'static str {
        "swapoff"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.clone()]
    }
}

/// `wipefs -af`: erase every filesystem and partition table signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wipefs {
    pub device: String,
}

impl ToolArgs for Wipefs {
    fn program(&self) -> &'static str {
        "wipefs"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-af".to_string(), self.device.clone()]
    }
}

/// A single scripted `parted` operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartedCommand {
    /// `mklabel gpt|msdos`
    MkLabel { label: String },
    /// `mkpart primary <fs> <start> <end>`
    MkPart {
        fs_type: String,
        start: String,
        end: String,
    },
    /// `set <n> <flag> on`
    SetFlag { number: u32, flag: String },
}

/// `parted -s <disk> <command>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parted {
    pub disk: String,
    pub command: PartedCommand,
}

impl ToolArgs for Parted {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-s".to_string(), self.disk.clone()];
        match &self.command {
            PartedCommand::MkLabel { label } => {
                args.extend(["mklabel".to_string(), label.clone()]);
            }
            PartedCommand::MkPart { fs_type, start, end } => {
                args.extend([
                    "mkpart".to_string(),
                    "primary".to_string(),
                    fs_type.clone(),
                    start.clone(),
                    end.clone(),
                ]);
            }
            PartedCommand::SetFlag { number, flag } => {
                args.extend([
                    "set".to_string(),
                    number.to_string(),
                    flag.clone(),
                    "on".to_string(),
                ]);
            }
        }
        args
    }
}

/// Ask the kernel to re-read the partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partprobe {
    pub disk: String,
}

impl ToolArgs for Partprobe {
    fn program(&self) -> &'static str {
        "partprobe"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.disk.clone()]
    }
}

/// Print the filesystem UUID of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blkid {
    pub device: String,
}

impl ToolArgs for Blkid {
    fn program(&self) -> &'static str {
        "blkid"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            "UUID".to_string(),
            "-o".to_string(),
            "value".to_string(),
            self.device.clone(),
        ]
    }
}
