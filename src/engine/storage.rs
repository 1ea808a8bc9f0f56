//! Storage Stack Engine
//!
//! Plans and applies the disk layout: teardown of stale holders, partition
//! table creation, optional LUKS2 under the root filesystem, formatting and
//! mounting of the target tree.
//!
//! # Layouts
//!
//! | Scheme      | Partitions |
//! |-------------|------------|
//! | GptWithEsp  | 1: ESP, FAT32, 1MiB-513MiB, `esp` flag; 2: root, rest of disk |
//! | MbrLegacy   | 1: root, whole disk, `boot` flag |
//!
//! Planning is pure: `plan_partitioning` and `plan_storage` produce ordered
//! `StorageOp`s without touching anything. The `apply` functions run them
//! through an `Executor`. Nothing here is ever retried.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Secret;
use crate::engine::naming::{partition_path, split_partition_path};
use crate::error::{InstallError, Result};
use crate::executor::{Executor, Invocation};
use crate::tools::disk::{Lsblk, Parted, PartedCommand, Partprobe, Swapoff, Umount, Wipefs};
use crate::tools::encryption::{
    mapped_device, parse_backing_device, CryptsetupClose, CryptsetupFormat, CryptsetupOpen, CryptsetupStatus,
    KeyDerivation, MAPPER_NAME,
};
use crate::tools::filesystem::{MkfsExt4, MkfsFat, Mount};
use crate::types::PartitionScheme;

/// ESP bounds on GPT disks
pub const ESP_START: &str = "1MiB";
pub const ESP_END: &str = "513MiB";

/// Where the ESP is mounted, relative to the target root
pub const ESP_MOUNT: &str = "boot/efi";

// ============================================================================
// Layout
// ============================================================================

/// Partition device paths produced by the planner. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    pub disk: String,
    pub scheme: PartitionScheme,
    /// Present only under `GptWithEsp`
    pub efi_partition: Option<String>,
    pub root_partition: String,
}

impl PartitionLayout {
    /// Compute the layout a scheme produces on a disk
    pub fn for_disk(disk: &str, scheme: PartitionScheme) -> Self {
        match scheme {
            PartitionScheme::GptWithEsp => Self {
                disk: disk.to_string(),
                scheme,
                efi_partition: Some(partition_path(disk, 1)),
                root_partition: partition_path(disk, 2),
            },
            PartitionScheme::MbrLegacy => Self {
                disk: disk.to_string(),
                scheme,
                efi_partition: None,
                root_partition: partition_path(disk, 1),
            },
        }
    }

    /// Device holding the root filesystem: the mapped device iff encrypted
    pub fn root_target(&self, encrypted: bool) -> String {
        if encrypted {
            mapped_device()
        } else {
            self.root_partition.clone()
        }
    }

    pub fn partition_count(&self) -> usize {
        if self.efi_partition.is_some() { 2 } else { 1 }
    }
}

impl fmt::Display for PartitionLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: ", self.scheme, self.disk)?;
        if let Some(efi) = &self.efi_partition {
            write!(f, "efi={efi}, ")?;
        }
        write!(f, "root={}", self.root_partition)
    }
}

/// The mounted target tree. Later pipeline steps only run against one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountState {
    pub mount_point: PathBuf,
    /// Device mounted at the root
    pub root_device: String,
    pub encrypted: bool,
    /// ESP mounted at `<mount_point>/boot/efi`
    pub esp_mounted: bool,
}

impl MountState {
    pub fn esp_dir(&self) -> PathBuf {
        self.mount_point.join(ESP_MOUNT)
    }
}

// ============================================================================
// Storage Operation Types
// ============================================================================

/// Filesystems the installer creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filesystem {
    Fat32,
    Ext4,
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fat32 => write!(f, "fat32"),
            Self::Ext4 => write!(f, "ext4"),
        }
    }
}

/// A single atomic storage operation in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Unmount, swap off and close everything living on the disk (best-effort)
    Teardown { disk: String },
    /// Erase signatures (failure only warns)
    Wipe { disk: String },
    MkLabel { disk: String, label: String },
    MkPart {
        disk: String,
        number: u32,
        fs_type: Filesystem,
        start: String,
        end: String,
    },
    SetFlag { disk: String, number: u32, flag: String },
    /// Re-read the partition table and let udev settle
    Reprobe { disk: String },
    LuksFormat { device: String, kdf: KeyDerivation },
    LuksOpen { device: String },
    Format { device: String, filesystem: Filesystem },
    Mount { device: String, target: PathBuf },
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Teardown { disk } => write!(f, "Teardown({disk})"),
            Self::Wipe { disk } => write!(f, "Wipe({disk})"),
            Self::MkLabel { disk, label } => write!(f, "MkLabel({disk}, {label})"),
            Self::MkPart { disk, number, fs_type, start, end } => {
                write!(f, "MkPart({disk} #{number}, {fs_type}, {start}-{end})")
            }
            Self::SetFlag { disk, number, flag } => write!(f, "SetFlag({disk} #{number}, {flag})"),
            Self::Reprobe { disk } => write!(f, "Reprobe({disk})"),
            Self::LuksFormat { device, kdf } => write!(f, "LuksFormat({device}, {kdf})"),
            Self::LuksOpen { device } => {
                write!(f, "LuksOpen({device} -> {})", mapped_device())
            }
            Self::Format { device, filesystem } => write!(f, "Format({device}, {filesystem})"),
            Self::Mount { device, target } => {
                write!(f, "Mount({device} -> {})", target.display())
            }
        }
    }
}

/// A partitioning plan: ordered operations plus the layout they produce.
#[derive(Debug, Clone)]
pub struct StoragePlan {
    pub ops: Vec<StorageOp>,
    pub layout: PartitionLayout,
}

impl StoragePlan {
    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Storage Plan: {}", self.layout.scheme),
            format!("  Target: {}", self.layout.disk),
            format!("  Layout: {}", self.layout),
            format!("  Operations ({}):", self.ops.len()),
        ];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, op));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Plan Calculation
// ============================================================================

/// Plan the partitioning of `disk` under `scheme`. Pure, no I/O.
pub fn plan_partitioning(disk: &str, scheme: PartitionScheme) -> StoragePlan {
    let layout = PartitionLayout::for_disk(disk, scheme);
    let disk = disk.to_string();

    let mut ops = vec![
        StorageOp::Teardown { disk: disk.clone() },
        StorageOp::Wipe { disk: disk.clone() },
        StorageOp::MkLabel {
            disk: disk.clone(),
            label: scheme.label_type().to_string(),
        },
    ];

    match scheme {
        PartitionScheme::GptWithEsp => {
            ops.push(StorageOp::MkPart {
                disk: disk.clone(),
                number: 1,
                fs_type: Filesystem::Fat32,
                start: ESP_START.to_string(),
                end: ESP_END.to_string(),
            });
            ops.push(StorageOp::SetFlag {
                disk: disk.clone(),
                number: 1,
                flag: "esp".to_string(),
            });
            ops.push(StorageOp::MkPart {
                disk: disk.clone(),
                number: 2,
                fs_type: Filesystem::Ext4,
                start: ESP_END.to_string(),
                end: "100%".to_string(),
            });
        }
        PartitionScheme::MbrLegacy => {
            ops.push(StorageOp::MkPart {
                disk: disk.clone(),
                number: 1,
                fs_type: Filesystem::Ext4,
                start: ESP_START.to_string(),
                end: "100%".to_string(),
            });
            ops.push(StorageOp::SetFlag {
                disk: disk.clone(),
                number: 1,
                flag: "boot".to_string(),
            });
        }
    }

    ops.push(StorageOp::Reprobe { disk });

    StoragePlan { ops, layout }
}

/// Plan formatting and mounting of a partitioned layout. Pure, no I/O.
///
/// With `encryption` set, the container is created on the root partition
/// with that key derivation, and the mapped device is what gets formatted
/// and mounted.
pub fn plan_storage(
    layout: &PartitionLayout,
    encryption: Option<KeyDerivation>,
    mount_point: &Path,
) -> Vec<StorageOp> {
    let mut ops = Vec::new();
    let encrypted = encryption.is_some();

    if let Some(efi) = &layout.efi_partition {
        ops.push(StorageOp::Format {
            device: efi.clone(),
            filesystem: Filesystem::Fat32,
        });
    }

    if let Some(kdf) = encryption {
        ops.push(StorageOp::LuksFormat {
            device: layout.root_partition.clone(),
            kdf,
        });
        ops.push(StorageOp::LuksOpen {
            device: layout.root_partition.clone(),
        });
    }

    let root = layout.root_target(encrypted);
    ops.push(StorageOp::Format {
        device: root.clone(),
        filesystem: Filesystem::Ext4,
    });
    ops.push(StorageOp::Mount {
        device: root,
        target: mount_point.to_path_buf(),
    });

    if let Some(efi) = &layout.efi_partition {
        ops.push(StorageOp::Mount {
            device: efi.clone(),
            target: mount_point.join(ESP_MOUNT),
        });
    }

    ops
}

// ============================================================================
// Application
// ============================================================================

/// Clear stale holders, then partition `disk` under `scheme`.
///
/// Safe to run again after a failed attempt: leftover mounts, swap and open
/// mappings from the first run are torn down before anything is written.
pub fn plan_and_partition(
    exec: &mut dyn Executor,
    disk: &str,
    scheme: PartitionScheme,
    settle_delay: Duration,
) -> Result<PartitionLayout> {
    let plan = plan_partitioning(disk, scheme);
    log::info!("{}", plan.summary());

    for op in &plan.ops {
        apply(exec, op, None, settle_delay)?;
    }

    log::info!("Partitioning complete: {}", plan.layout);
    Ok(plan.layout)
}

/// Format the layout, creating the LUKS2 container first when `secret` is given.
///
/// `kdf` must match what the boot path can unlock: GRUB reads PBKDF2 keyslots
/// only.
pub fn format(
    exec: &mut dyn Executor,
    layout: &PartitionLayout,
    secret: Option<&Secret>,
    kdf: KeyDerivation,
) -> Result<()> {
    let ops = plan_storage(layout, secret.map(|_| kdf), Path::new("/"));
    for op in ops.iter().filter(|op| !matches!(op, StorageOp::Mount { .. })) {
        apply(exec, op, secret, Duration::ZERO)?;
    }
    log::info!("Formatting complete");
    Ok(())
}

/// Mount root (the mapped device iff `encrypted`) and, under GPT, the ESP.
pub fn mount(
    exec: &mut dyn Executor,
    layout: &PartitionLayout,
    encrypted: bool,
    mount_point: &Path,
) -> Result<MountState> {
    let ops = plan_storage(layout, encrypted.then_some(KeyDerivation::default()), mount_point);
    for op in ops.iter().filter(|op| matches!(op, StorageOp::Mount { .. })) {
        apply(exec, op, None, Duration::ZERO)?;
    }

    let state = MountState {
        mount_point: mount_point.to_path_buf(),
        root_device: layout.root_target(encrypted),
        encrypted,
        esp_mounted: layout.efi_partition.is_some(),
    };
    log::info!("Target mounted at {}", mount_point.display());
    Ok(state)
}

/// Recursively unmount the target and close the mapping. Never fails.
pub fn unmount(exec: &mut dyn Executor, state: &MountState) {
    log::info!("Unmounting {}", state.mount_point.display());
    exec.run_best_effort(&Invocation::tool(&Umount {
        target: state.mount_point.display().to_string(),
        force: false,
        recursive: true,
    }));
    if state.encrypted {
        exec.run_best_effort(&Invocation::tool(&CryptsetupClose {
            name: MAPPER_NAME.to_string(),
        }));
    }
}

/// Run one storage operation with its failure policy.
fn apply(
    exec: &mut dyn Executor,
    op: &StorageOp,
    secret: Option<&Secret>,
    settle_delay: Duration,
) -> Result<()> {
    log::debug!("Applying {}", op);
    match op {
        StorageOp::Teardown { disk } => {
            teardown(exec, disk);
            Ok(())
        }
        StorageOp::Wipe { disk } => {
            if !exec.run_best_effort(&Invocation::tool(&Wipefs { device: disk.clone() })) {
                log::warn!("Could not wipe signatures on {}", disk);
            }
            exec.run_best_effort(&Invocation::tool(&Partprobe { disk: disk.clone() }));
            exec.settle(settle_delay);
            Ok(())
        }
        StorageOp::MkLabel { disk, label } => parted(
            exec,
            disk,
            PartedCommand::MkLabel { label: label.clone() },
            &format!("Creating {label} partition table"),
        ),
        StorageOp::MkPart { disk, number, fs_type, start, end } => parted(
            exec,
            disk,
            PartedCommand::MkPart {
                fs_type: fs_type.to_string(),
                start: start.clone(),
                end: end.clone(),
            },
            &format!("Creating partition {number}"),
        ),
        StorageOp::SetFlag { disk, number, flag } => parted(
            exec,
            disk,
            PartedCommand::SetFlag {
                number: *number,
                flag: flag.clone(),
            },
            &format!("Setting {flag} flag on partition {number}"),
        ),
        StorageOp::Reprobe { disk } => {
            exec.run_best_effort(&Invocation::tool(&Partprobe { disk: disk.clone() }));
            exec.settle(settle_delay);
            Ok(())
        }
        StorageOp::LuksFormat { device, kdf } => {
            let passphrase = secret
                .ok_or_else(|| InstallError::encryption("no encryption secret available"))?;
            log::info!("Creating LUKS2 container on {} ({})", device, kdf);
            exec.run_tool(&CryptsetupFormat {
                device: device.clone(),
                passphrase: passphrase.clone(),
                kdf: *kdf,
            })?
            .ensure_success_as("cryptsetup luksFormat", InstallError::Encryption)
        }
        StorageOp::LuksOpen { device } => {
            let passphrase = secret
                .ok_or_else(|| InstallError::encryption("no encryption secret available"))?;
            exec.run_tool(&CryptsetupOpen {
                device: device.clone(),
                name: MAPPER_NAME.to_string(),
                passphrase: passphrase.clone(),
            })?
            .ensure_success_as("cryptsetup open", InstallError::Encryption)
        }
        StorageOp::Format { device, filesystem } => {
            log::info!("Formatting {} as {}", device, filesystem);
            let output = match filesystem {
                Filesystem::Fat32 => exec.run_tool(&MkfsFat { device: device.clone() })?,
                Filesystem::Ext4 => exec.run_tool(&MkfsExt4 { device: device.clone() })?,
            };
            output.ensure_success_as(&format!("Formatting {device}"), InstallError::Format)
        }
        StorageOp::Mount { device, target } => {
            exec.create_dir_all(target)?;
            exec.run_tool(&Mount {
                source: device.clone(),
                target: target.display().to_string(),
            })?
            .ensure_success_as(
                &format!("Mounting {} at {}", device, target.display()),
                InstallError::Mount,
            )
        }
    }
}

fn parted(exec: &mut dyn Executor, disk: &str, command: PartedCommand, context: &str) -> Result<()> {
    log::info!("{} on {}", context, disk);
    exec.run_tool(&Parted {
        disk: disk.to_string(),
        command,
    })?
    .ensure_success_as(context, InstallError::Partition)
}

/// A node under the disk as reported by `lsblk -rnp -o NAME,TYPE,MOUNTPOINT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub path: String,
    pub kind: String,
    pub mountpoint: Option<String>,
}

/// Parse the raw lsblk listing. Whitespace in mountpoints arrives escaped as `\x20`.
pub fn parse_block_tree(output: &str) -> Vec<BlockNode> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let path = fields.next()?.to_string();
            let kind = fields.next()?.to_string();
            let mountpoint = fields.next().map(|m| m.replace("\\x20", " "));
            Some(BlockNode { path, kind, mountpoint })
        })
        .collect()
}

/// Forcibly release everything holding the disk. Every failure only logs.
fn teardown(exec: &mut dyn Executor, disk: &str) {
    log::info!("Checking for mounted partitions on {}...", disk);

    let listing = match exec.run_tool(&Lsblk::Tree { disk: disk.to_string() }) {
        Ok(output) if output.success => output.stdout,
        Ok(output) => {
            log::warn!("lsblk {} failed: {}", disk, output.stderr.trim());
            String::new()
        }
        Err(e) => {
            log::warn!("lsblk {}: {}", disk, e);
            String::new()
        }
    };
    let nodes = parse_block_tree(&listing);

    // Deepest mountpoints first so nested mounts release their parents
    let mut mountpoints: Vec<&str> = nodes
        .iter()
        .filter_map(|n| n.mountpoint.as_deref())
        .filter(|m| *m != "[SWAP]")
        .collect();
    mountpoints.sort_by_key(|m| std::cmp::Reverse(m.matches('/').count()));
    for target in mountpoints {
        log::info!("Unmounting stale mount {}", target);
        exec.run_best_effort(&Invocation::tool(&Umount {
            target: target.to_string(),
            force: true,
            recursive: true,
        }));
    }

    for node in nodes.iter().filter(|n| n.mountpoint.as_deref() == Some("[SWAP]")) {
        log::info!("Disabling swap on {}", node.path);
        exec.run_best_effort(&Invocation::tool(&Swapoff {
            device: node.path.clone(),
        }));
    }

    for node in nodes.iter().rev().filter(|n| n.kind == "crypt") {
        log::info!("Closing mapping {}", node.path);
        exec.run_best_effort(&Invocation::tool(&CryptsetupClose {
            name: node.path.clone(),
        }));
    }

    // A stale mapping from an earlier attempt may outlive its partition
    if !nodes.iter().any(|n| n.path == mapped_device()) && exec.exists(Path::new(&mapped_device())) {
        match stale_mapping_backing(exec) {
            Some(device) if belongs_to_disk(&device, disk) => {
                log::info!("Closing stale mapping {} on {}", MAPPER_NAME, device);
                exec.run_best_effort(&Invocation::tool(&CryptsetupClose {
                    name: MAPPER_NAME.to_string(),
                }));
            }
            Some(device) => {
                log::warn!("Leaving {} open: it is backed by {}, not {}", MAPPER_NAME, device, disk);
            }
            None => {
                log::warn!("Leaving {} open: backing device unknown", MAPPER_NAME);
            }
        }
    }
}

fn stale_mapping_backing(exec: &mut dyn Executor) -> Option<String> {
    let status = CryptsetupStatus {
        name: MAPPER_NAME.to_string(),
    };
    match exec.run_tool(&status) {
        Ok(output) => parse_backing_device(&output.stdout),
        Err(e) => {
            log::warn!("cryptsetup status {}: {}", MAPPER_NAME, e);
            None
        }
    }
}

/// True when `device` is `disk` itself or one of its partitions
fn belongs_to_disk(device: &str, disk: &str) -> bool {
    device == disk || split_partition_path(device).is_some_and(|(parent, _)| parent == disk)
}

// ============================================================================
// Tests
// ============================================================================
