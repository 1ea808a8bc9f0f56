//! Hardware environment detection
//!
//! Detects firmware mode (UEFI vs BIOS) and installed memory, and parses the
//! disk enumeration feed produced by `lsblk`.
//!
//! Detection never fails: an unreadable source logs a warning and falls back
//! to a safe default.

use std::fmt;
use std::path::Path;

use crate::types::{BootMode, PartitionScheme};

/// Sysfs directory the kernel exposes only when booted through UEFI
pub const EFI_SYSFS_PATH: &str = "/sys/firmware/efi";

/// Memory assumed when `/proc/meminfo` cannot be read
pub const FALLBACK_RAM_MIB: u64 = 4096;

/// Detected firmware mode of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareMode {
    /// UEFI firmware: GPT with an ESP, GRUB UEFI or direct boot
    Uefi,
    /// Legacy BIOS firmware: msdos label, GRUB BIOS only
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }

    /// Returns true if the system booted in legacy BIOS mode.
    pub fn is_bios(self) -> bool {
        matches!(self, Self::Bios)
    }

    /// Partition scheme the planner uses under this firmware
    pub fn partition_scheme(self) -> PartitionScheme {
        match self {
            Self::Uefi => PartitionScheme::GptWithEsp,
            Self::Bios => PartitionScheme::MbrLegacy,
        }
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Aggregated hardware detection results.
#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub firmware: FirmwareMode,
    /// Total installed memory in MiB
    pub ram_mib: u64,
}

impl HardwareInfo {
    /// Detect the hardware environment of the running system.
    ///
    /// `boot_mode` forces the firmware mode unless it is `Auto`.
    pub fn detect(boot_mode: BootMode) -> Self {
        let firmware = resolve_firmware_mode(boot_mode);
        let ram_mib = detect_ram_mib();

        log::info!("Hardware detection: firmware={}, ram={} MiB", firmware, ram_mib);

        Self { firmware, ram_mib }
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Firmware: {}, RAM: {} MiB", self.firmware, self.ram_mib)
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Detect firmware mode by checking for the EFI sysfs directory.
pub fn detect_firmware_mode() -> FirmwareMode {
    detect_firmware_mode_at(Path::new(EFI_SYSFS_PATH))
}

/// Detect firmware mode against an arbitrary sysfs path.
pub fn detect_firmware_mode_at(efi_path: &Path) -> FirmwareMode {
    if efi_path.exists() {
        log::info!("UEFI firmware detected ({} exists)", efi_path.display());
        FirmwareMode::Uefi
    } else {
        log::info!("BIOS firmware detected ({} not found)", efi_path.display());
        FirmwareMode::Bios
    }
}

/// Apply a configured override, detecting only for `BootMode::Auto`.
pub fn resolve_firmware_mode(boot_mode: BootMode) -> FirmwareMode {
    match boot_mode {
        BootMode::Uefi => {
            log::info!("Firmware mode forced to UEFI");
            FirmwareMode::Uefi
        }
        BootMode::Bios => {
            log::info!("Firmware mode forced to BIOS");
            FirmwareMode::Bios
        }
        BootMode::Auto => detect_firmware_mode(),
    }
}

/// Total memory in MiB from `/proc/meminfo`.
pub fn detect_ram_mib() -> u64 {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(content) => parse_meminfo_mib(&content).unwrap_or_else(|| {
            log::warn!("MemTotal missing from /proc/meminfo, assuming {} MiB", FALLBACK_RAM_MIB);
            FALLBACK_RAM_MIB
        }),
        Err(e) => {
            log::warn!("Failed to read /proc/meminfo: {}, assuming {} MiB", e, FALLBACK_RAM_MIB);
            FALLBACK_RAM_MIB
        }
    }
}

/// Parse the `MemTotal:` line (reported in kB) into MiB.
pub fn parse_meminfo_mib(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

// ============================================================================
// Disk enumeration
// ============================================================================

/// One entry of the disk enumeration feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    /// Device path, e.g. `/dev/nvme0n1`
    pub device: String,
    /// Human-readable size as printed by lsblk
    pub size: String,
    pub model: String,
}

impl fmt::Display for DiskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.device, self.size, self.model)
    }
}

/// Parse `lsblk -d -n -o NAME,SIZE,MODEL,TYPE` output into whole disks.
///
/// The model column may contain spaces or be empty; the type is always the
/// last column, so everything between size and type is the model.
pub fn parse_disk_list(output: &str) -> Vec<DiskInfo> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            let kind = parts[parts.len() - 1];
            if kind != "disk" {
                return None;
            }
            let model = if parts.len() > 3 {
                parts[2..parts.len() - 1].join(" ")
            } else {
                "Unknown".to_string()
            };
            Some(DiskInfo {
                device: format!("/dev/{}", parts[0]),
                size: parts[1].to_string(),
                model,
            })
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
