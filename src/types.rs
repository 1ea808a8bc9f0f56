//! Type-safe configuration types for the installer
//!
//! Stringly-typed selections from the configuration record become proper Rust
//! enums here, giving compile-time validation and exhaustive matching.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Firmware mode override from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum BootMode {
    /// Detect from `/sys/firmware/efi`
    #[default]
    #[strum(serialize = "auto")]
    Auto,
    #[strum(serialize = "uefi")]
    Uefi,
    #[strum(serialize = "bios")]
    Bios,
}

/// Disk partitioning scheme, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum PartitionScheme {
    /// GPT label with an EFI System Partition followed by root
    #[strum(serialize = "gpt")]
    GptWithEsp,
    /// msdos label with a single bootable root partition
    #[strum(serialize = "mbr")]
    MbrLegacy,
}

impl PartitionScheme {
    /// Returns true if this scheme carries an EFI System Partition
    pub fn has_esp(self) -> bool {
        matches!(self, Self::GptWithEsp)
    }

    /// Label name understood by `parted mklabel`
    pub fn label_type(self) -> &'static str {
        match self {
            Self::GptWithEsp => "gpt",
            Self::MbrLegacy => "msdos",
        }
    }
}

/// Bootloader selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Bootloader {
    #[default]
    #[strum(serialize = "grub")]
    Grub,
    /// "No more boot loader": firmware loads the kernel directly (EFISTUB)
    #[strum(serialize = "nmbl")]
    Nmbl,
}

/// Linux kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Kernel {
    #[default]
    #[serde(rename = "linux")]
    #[strum(serialize = "linux")]
    Linux,
    #[serde(rename = "linux-lts")]
    #[strum(serialize = "linux-lts")]
    LinuxLts,
    #[serde(rename = "linux-zen")]
    #[strum(serialize = "linux-zen")]
    LinuxZen,
    #[serde(rename = "linux-hardened")]
    #[strum(serialize = "linux-hardened")]
    LinuxHardened,
    /// BORE scheduler kernel, only available from a community repository
    #[serde(rename = "linux-bore")]
    #[strum(serialize = "linux-bore")]
    LinuxBore,
}

impl Kernel {
    /// Returns true if pacstrap can install this kernel from the official repositories
    pub fn in_base_repo(self) -> bool {
        !matches!(self, Self::LinuxBore)
    }

    /// Package name for the kernel image (also names `/boot/vmlinuz-<name>`)
    pub fn package(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::LinuxLts => "linux-lts",
            Self::LinuxZen => "linux-zen",
            Self::LinuxHardened => "linux-hardened",
            Self::LinuxBore => "linux-cachyos",
        }
    }

    /// Matching headers package
    pub fn headers_package(self) -> String {
        format!("{}-headers", self.package())
    }
}

/// Input method engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InputMethodEngine {
    #[default]
    Kime,
    Fcitx5,
    Ibus,
}

impl InputMethodEngine {
    /// Module name used in `GTK_IM_MODULE` / `QT_IM_MODULE` / `XMODIFIERS`
    pub fn im_module(self) -> &'static str {
        match self {
            Self::Kime => "kime",
            Self::Fcitx5 => "fcitx",
            Self::Ibus => "ibus",
        }
    }

    /// Daemon command line started by the autostart entry and user unit
    pub fn daemon_command(self) -> &'static str {
        match self {
            Self::Kime => "/usr/bin/kime",
            Self::Fcitx5 => "/usr/bin/fcitx5",
            Self::Ibus => "/usr/bin/ibus-daemon -rxR",
        }
    }

    /// Human-readable name for generated desktop entries
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Kime => "Kime Input Method",
            Self::Fcitx5 => "Fcitx5 Input Method",
            Self::Ibus => "IBus Input Method",
        }
    }
}

/// Swap configuration mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SwapMode {
    /// No swap file
    None,
    /// RAM / 2
    Small,
    /// RAM size, enough for hibernation
    Suspend,
    /// Fixed 8 GiB swap file
    #[default]
    File,
}

impl SwapMode {
    /// Fixed size used by `SwapMode::File`
    pub const FIXED_SIZE_MIB: u64 = 8192;

    /// Swap file size in MiB for the given amount of RAM
    pub fn size_mib(self, ram_mib: u64) -> u64 {
        match self {
            Self::None => 0,
            Self::Small => ram_mib / 2,
            Self::Suspend => ram_mib,
            Self::File => Self::FIXED_SIZE_MIB,
        }
    }
}
