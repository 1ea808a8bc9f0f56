//! Property-based tests for the Blunux installer
//!
//! These tests verify:
//! - Partition naming round-trips for every disk naming convention
//! - Partition plan shape per scheme
//! - Format/mount targets follow the encryption flag
//! - Enum string round-trips and configuration invariants

use std::path::Path;

use proptest::prelude::*;
use strum::IntoEnumIterator;

use blunux_installer::engine::storage::{plan_partitioning, plan_storage, StorageOp};
use blunux_installer::tools::encryption::{mapped_device, KeyDerivation};
use blunux_installer::{
    partition_path, split_partition_path, Bootloader, Configuration, Kernel, PartitionScheme, Secret,
    SwapMode,
};

// =============================================================================
// Partition Naming
// =============================================================================

/// Disks whose names end in a letter: sda, vdb, hdc
fn lettered_disk() -> impl Strategy<Value = String> {
    prop_oneof![Just("sd"), Just("vd"), Just("hd"), Just("xvd")]
        .prop_flat_map(|prefix| "[a-z]{1,2}".prop_map(move |suffix| format!("/dev/{prefix}{suffix}")))
}

/// Disks whose names end in a digit: nvme0n1, mmcblk0, loop3
fn numbered_disk() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u8..8, 1u8..8).prop_map(|(c, n)| format!("/dev/nvme{c}n{n}")),
        (0u8..8).prop_map(|n| format!("/dev/mmcblk{n}")),
        (0u8..16).prop_map(|n| format!("/dev/loop{n}")),
    ]
}

fn any_disk() -> impl Strategy<Value = String> {
    prop_oneof![lettered_disk(), numbered_disk()]
}

fn scheme_strategy() -> impl Strategy<Value = PartitionScheme> {
    prop_oneof![Just(PartitionScheme::GptWithEsp), Just(PartitionScheme::MbrLegacy)]
}

proptest! {
    /// split_partition_path inverts partition_path
    #[test]
    fn partition_path_roundtrip(disk in any_disk(), number in 1u32..128) {
        let partition = partition_path(&disk, number);
        prop_assert_eq!(split_partition_path(&partition), Some((disk, number)));
    }

    /// Digit-terminated disks get the `p` separator, others do not
    #[test]
    fn numbered_disks_use_p_separator(disk in numbered_disk(), number in 1u32..128) {
        prop_assert_eq!(partition_path(&disk, number), format!("{disk}p{number}"));
    }

    #[test]
    fn lettered_disks_append_number(disk in lettered_disk(), number in 1u32..128) {
        prop_assert_eq!(partition_path(&disk, number), format!("{disk}{number}"));
    }
}

// =============================================================================
// Partition Planning
// =============================================================================

proptest! {
    /// BIOS plans carry a single root partition and no ESP
    #[test]
    fn bios_plan_has_no_esp(disk in any_disk()) {
        let plan = plan_partitioning(&disk, PartitionScheme::MbrLegacy);
        prop_assert!(plan.layout.efi_partition.is_none());
        prop_assert_eq!(plan.layout.partition_count(), 1);
        prop_assert_eq!(plan.layout.root_partition, partition_path(&disk, 1));
        let has_esp_flag = plan
            .ops
            .iter()
            .any(|op| matches!(op, StorageOp::SetFlag { flag, .. } if flag == "esp"));
        prop_assert!(!has_esp_flag);
    }

    /// UEFI plans put the ESP first and root second
    #[test]
    fn uefi_plan_has_esp_first(disk in any_disk()) {
        let plan = plan_partitioning(&disk, PartitionScheme::GptWithEsp);
        prop_assert_eq!(plan.layout.partition_count(), 2);
        prop_assert_eq!(plan.layout.efi_partition, Some(partition_path(&disk, 1)));
        prop_assert_eq!(plan.layout.root_partition, partition_path(&disk, 2));

        let parts: Vec<u32> = plan
            .ops
            .iter()
            .filter_map(|op| match op {
                StorageOp::MkPart { number, .. } => Some(*number),
                _ => None,
            })
            .collect();
        prop_assert_eq!(parts, vec![1, 2]);
    }

    /// Stale holders are released before the label is rewritten
    #[test]
    fn teardown_precedes_label(disk in any_disk(), scheme in scheme_strategy()) {
        let plan = plan_partitioning(&disk, scheme);
        let teardown = plan.ops.iter().position(|op| matches!(op, StorageOp::Teardown { .. }));
        let label = plan.ops.iter().position(|op| matches!(op, StorageOp::MkLabel { .. }));
        prop_assert!(teardown.is_some());
        prop_assert!(teardown < label);
    }

    /// Root is formatted and mounted through the mapped device iff encrypted
    #[test]
    fn root_target_follows_encryption(
        disk in any_disk(),
        scheme in scheme_strategy(),
        encrypted in any::<bool>(),
        pbkdf2 in any::<bool>(),
    ) {
        let kdf = if pbkdf2 { KeyDerivation::Pbkdf2 } else { KeyDerivation::Argon2id };
        let layout = plan_partitioning(&disk, scheme).layout;
        let ops = plan_storage(&layout, encrypted.then_some(kdf), Path::new("/mnt"));
        let expected = if encrypted { mapped_device() } else { layout.root_partition.clone() };

        let root_mount = ops.iter().find_map(|op| match op {
            StorageOp::Mount { device, target } if target == Path::new("/mnt") => Some(device.clone()),
            _ => None,
        });
        prop_assert_eq!(root_mount, Some(expected.clone()));

        let formats_raw_root = ops.iter().any(|op| {
            matches!(op, StorageOp::Format { device, .. } if *device == layout.root_partition)
        });
        prop_assert_eq!(formats_raw_root, !encrypted);

        let luks_kdf = ops.iter().find_map(|op| match op {
            StorageOp::LuksFormat { kdf, .. } => Some(*kdf),
            _ => None,
        });
        prop_assert_eq!(luks_kdf, encrypted.then_some(kdf));
    }
}

// =============================================================================
// Enum Round-trips
// =============================================================================

#[test]
fn kernel_roundtrip() {
    for kernel in Kernel::iter() {
        let parsed: Kernel = kernel.to_string().parse().expect("Should parse");
        assert_eq!(kernel, parsed);
    }
}

#[test]
fn swap_mode_roundtrip() {
    for mode in SwapMode::iter() {
        let parsed: SwapMode = mode.to_string().parse().expect("Should parse");
        assert_eq!(mode, parsed);
    }
}

proptest! {
    /// Bootloader names parse regardless of case
    #[test]
    fn bootloader_parse_ignores_case(upper in any::<bool>(), nmbl in any::<bool>()) {
        let name = if nmbl { "nmbl" } else { "grub" };
        let input = if upper { name.to_uppercase() } else { name.to_string() };
        let parsed: Bootloader = input.parse().expect("Should parse");
        prop_assert_eq!(parsed, if nmbl { Bootloader::Nmbl } else { Bootloader::Grub });
    }
}

// =============================================================================
// Configuration Invariants
// =============================================================================

fn valid_config() -> Configuration {
    let mut config = Configuration::default();
    config.install.target_disk = "/dev/sda".to_string();
    config.install.hostname = "blunux".to_string();
    config.install.username = "alice".to_string();
    config.install.root_password = Secret::new("root");
    config.install.user_password = Secret::new("alice");
    config
}

proptest! {
    /// Valid host names are accepted
    #[test]
    fn hostname_valid_accepted(hostname in "[a-z][a-z0-9-]{0,30}") {
        let mut config = valid_config();
        config.install.hostname = hostname;
        prop_assert!(config.validate().is_ok());
    }

    /// Host names with characters outside [A-Za-z0-9-] are rejected
    #[test]
    fn hostname_invalid_chars_rejected(
        prefix in "[a-z]{1,5}",
        bad in "[_./@]",
        suffix in "[a-z]{0,5}",
    ) {
        let mut config = valid_config();
        config.install.hostname = format!("{prefix}{bad}{suffix}");
        prop_assert!(config.validate().is_err());
    }

    /// Targets outside /dev are rejected
    #[test]
    fn target_disk_outside_dev_rejected(name in "[a-z]{1,8}") {
        let mut config = valid_config();
        config.install.target_disk = format!("/tmp/{name}");
        prop_assert!(config.validate().is_err());
    }

    /// Encryption without a secret never validates
    #[test]
    fn encryption_requires_secret(disk in any_disk()) {
        let mut config = valid_config();
        config.install.target_disk = disk;
        config.install.encryption = true;
        config.install.encryption_password = Secret::new("");
        prop_assert!(config.validate().is_err());

        config.install.encryption_password = Secret::new("pw");
        prop_assert!(config.validate().is_ok());
    }
}
