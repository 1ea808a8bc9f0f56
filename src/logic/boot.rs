//! Boot Installer
//!
//! Exactly one strategy is installed per run, chosen once from the requested
//! bootloader and the partition scheme:
//!
//! | Requested | Scheme      | Strategy |
//! |-----------|-------------|----------|
//! | grub      | MbrLegacy   | GrubBios |
//! | grub      | GptWithEsp  | GrubUefi |
//! | nmbl      | GptWithEsp  | DirectBoot |
//! | nmbl      | MbrLegacy   | GrubBios, with a warning |
//!
//! Direct boot registers the kernel itself as a firmware boot entry
//! (EFISTUB). Kernel and initramfs are copied onto the ESP, and a pacman hook
//! copies them again whenever the kernel is upgraded.

use std::path::Path;

use strum::Display;

use crate::config::Configuration;
use crate::engine::naming::split_partition_path;
use crate::engine::storage::{MountState, PartitionLayout};
use crate::error::{InstallError, Result};
use crate::executor::Executor;
use crate::logic::in_target;
use crate::logic::resolver::KernelPlan;
use crate::tools::boot::{Efibootmgr, GrubInstall, GrubMkconfig, GrubTarget};
use crate::tools::disk::Blkid;
use crate::tools::encryption::{mapped_device, KeyDerivation, MAPPER_NAME};
use crate::tools::system::{Cp, Mkinitcpio};
use crate::types::{Bootloader, PartitionScheme};

/// ESP mount point inside the installed system
pub const EFI_DIRECTORY: &str = "/boot/efi";

pub const GRUB_DEFAULTS: &str = "/etc/default/grub";
pub const GRUB_CFG: &str = "/boot/grub/grub.cfg";
pub const MKINITCPIO_CONF: &str = "/etc/mkinitcpio.conf";

pub const NMBL_HOOK: &str = "/etc/pacman.d/hooks/99-nmbl-kernel-update.hook";
pub const NMBL_UPDATE: &str = "/usr/local/bin/nmbl-update";

/// Kernel parameters appended after the root clause
const KERNEL_PARAMS: &str = "rw quiet loglevel=3";

// ============================================================================
// Strategy
// ============================================================================

/// The boot strategy installed for this run. Terminal once chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BootStrategy {
    #[strum(serialize = "GRUB (BIOS)")]
    GrubBios,
    #[strum(serialize = "GRUB (UEFI)")]
    GrubUefi,
    #[strum(serialize = "Direct boot (EFISTUB)")]
    DirectBoot,
}

impl BootStrategy {
    /// Choose the strategy. The second value is a warning when the request
    /// could not be honoured.
    pub fn resolve(requested: Bootloader, scheme: PartitionScheme) -> (Self, Option<String>) {
        match (requested, scheme) {
            (Bootloader::Grub, PartitionScheme::MbrLegacy) => (Self::GrubBios, None),
            (Bootloader::Grub, PartitionScheme::GptWithEsp) => (Self::GrubUefi, None),
            (Bootloader::Nmbl, PartitionScheme::GptWithEsp) => (Self::DirectBoot, None),
            (Bootloader::Nmbl, PartitionScheme::MbrLegacy) => (
                Self::GrubBios,
                Some("Direct boot requires UEFI; falling back to GRUB (BIOS)".to_string()),
            ),
        }
    }

    pub fn is_grub(self) -> bool {
        matches!(self, Self::GrubBios | Self::GrubUefi)
    }

    /// Key derivation an encrypted root needs so this strategy can boot it.
    ///
    /// GRUB unlocks the container itself to read `/boot` and cannot derive
    /// argon2 keys; the direct-boot kernel is read from the ESP and the
    /// initramfs unlocks root.
    pub fn key_derivation(self) -> KeyDerivation {
        if self.is_grub() {
            KeyDerivation::Pbkdf2
        } else {
            KeyDerivation::Argon2id
        }
    }
}

/// A registered direct-boot entry, needed again when the kernel changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectBootEntry {
    pub disk: String,
    pub partition: u32,
    pub label: String,
    /// Root and unlock clauses plus kernel parameters, without `initrd=`
    pub cmdline: String,
}

impl DirectBootEntry {
    /// Firmware entry for one kernel on the ESP
    pub fn efibootmgr(&self, kernel: &str) -> Efibootmgr {
        Efibootmgr {
            disk: self.disk.clone(),
            partition: self.partition,
            label: self.label.clone(),
            loader: format!("\\EFI\\{}\\vmlinuz-{kernel}", self.label),
            cmdline: format!(
                "{} initrd=\\EFI\\{}\\initramfs-{kernel}.img",
                self.cmdline, self.label
            ),
        }
    }
}

/// Result of the boot stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOutcome {
    pub strategy: BootStrategy,
    pub entry: Option<DirectBootEntry>,
}

// ============================================================================
// Encrypted root support
// ============================================================================

/// Initramfs hook that unlocks the root container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnlockHook {
    #[strum(serialize = "encrypt")]
    Encrypt,
    #[strum(serialize = "sd-encrypt")]
    SdEncrypt,
}

impl UnlockHook {
    /// Kernel command line clause unlocking the container with `uuid`
    pub fn clause(self, uuid: &str) -> String {
        match self {
            Self::Encrypt => format!("cryptdevice=UUID={uuid}:{MAPPER_NAME}"),
            Self::SdEncrypt => format!("rd.luks.name={uuid}={MAPPER_NAME}"),
        }
    }
}

/// Insert the unlock hook into the `HOOKS=(…)` line of mkinitcpio.conf.
///
/// Systemd-based initramfs images get `sd-encrypt`, busybox ones `encrypt`.
/// The hook goes before `filesystems`. Returns `None` when there is no
/// `HOOKS` line to edit.
pub fn add_unlock_hook(conf: &str) -> Option<(String, UnlockHook)> {
    let mut hook = None;
    let mut lines: Vec<String> = Vec::new();

    for line in conf.lines() {
        let inner = line
            .trim()
            .strip_prefix("HOOKS=(")
            .and_then(|rest| rest.strip_suffix(')'));

        match inner {
            Some(inner) if hook.is_none() => {
                let mut hooks: Vec<&str> = inner.split_whitespace().collect();
                let chosen = if hooks.contains(&"systemd") {
                    UnlockHook::SdEncrypt
                } else {
                    UnlockHook::Encrypt
                };
                let name = chosen.to_string();
                if !hooks.contains(&name.as_str()) {
                    let at = hooks
                        .iter()
                        .position(|h| *h == "filesystems")
                        .unwrap_or(hooks.len());
                    hooks.insert(at, &name);
                }
                lines.push(format!("HOOKS=({})", hooks.join(" ")));
                hook = Some(chosen);
            }
            _ => lines.push(line.to_string()),
        }
    }

    hook.map(|h| (lines.join("\n") + "\n", h))
}

/// Root clause of the kernel command line
pub fn root_clause(uuid: &str, unlock: Option<UnlockHook>) -> String {
    match unlock {
        Some(hook) => format!("{} root={}", hook.clause(uuid), mapped_device()),
        None => format!("root=UUID={uuid}"),
    }
}

/// Full kernel command line for direct boot, without `initrd=`
pub fn kernel_cmdline(uuid: &str, unlock: Option<UnlockHook>) -> String {
    format!("{} {KERNEL_PARAMS}", root_clause(uuid, unlock))
}

// ============================================================================
// GRUB defaults
// ============================================================================

fn set_or_append(lines: &mut Vec<String>, key: &str, value: &str) {
    let prefix = format!("{key}=");
    let entry = format!("{key}={value}");
    match lines.iter_mut().find(|l| l.starts_with(&prefix)) {
        Some(line) => *line = entry,
        None => lines.push(entry),
    }
}

/// Hide the menu with a zero timeout and, when encrypted, add the unlock clause.
pub fn apply_grub_defaults(content: &str, unlock_clause: Option<&str>) -> String {
    let mut lines: Vec<String> = content.lines().map(String::from).collect();

    set_or_append(&mut lines, "GRUB_TIMEOUT", "0");
    set_or_append(&mut lines, "GRUB_TIMEOUT_STYLE", "hidden");

    if let Some(clause) = unlock_clause {
        let existing = lines
            .iter()
            .find_map(|l| l.strip_prefix("GRUB_CMDLINE_LINUX="))
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_default();
        let value = if existing.contains(clause) {
            existing
        } else if existing.is_empty() {
            clause.to_string()
        } else {
            format!("{existing} {clause}")
        };
        set_or_append(&mut lines, "GRUB_CMDLINE_LINUX", &format!("\"{value}\""));
        set_or_append(&mut lines, "GRUB_ENABLE_CRYPTODISK", "y");
    }

    lines.join("\n") + "\n"
}

// ============================================================================
// Direct boot artifacts
// ============================================================================

/// Pacman hook re-copying the kernels onto the ESP after upgrades
pub fn nmbl_hook(targets: &[&str]) -> String {
    let mut hook = String::from("[Trigger]\nType = Package\nOperation = Install\nOperation = Upgrade\n");
    for target in targets {
        hook.push_str(&format!("Target = {target}\n"));
    }
    hook.push_str(&format!(
        "\n[Action]\n\
         Description = Updating kernel in ESP for EFISTUB boot...\n\
         When = PostTransaction\n\
         Exec = {NMBL_UPDATE}\n\
         Depends = coreutils\n"
    ));
    hook
}

/// Script copying every installed kernel and initramfs onto the ESP
pub fn nmbl_update_script(label: &str, kernels: &[&str]) -> String {
    format!(
        "#!/bin/bash\n\
         # Copy kernels and initramfs images onto the ESP for EFISTUB boot\n\
         ESP_DIR={EFI_DIRECTORY}/EFI/{label}\n\
         mkdir -p \"$ESP_DIR\"\n\
         for kernel in {}; do\n\
         \x20   [ -f \"/boot/vmlinuz-$kernel\" ] || continue\n\
         \x20   cp \"/boot/vmlinuz-$kernel\" \"$ESP_DIR/vmlinuz-$kernel\"\n\
         \x20   cp \"/boot/initramfs-$kernel.img\" \"$ESP_DIR/initramfs-$kernel.img\"\n\
         done\n",
        kernels.join(" ")
    )
}

// ============================================================================
// Installation
// ============================================================================

/// Install the resolved boot strategy into the mounted tree.
pub fn install_bootloader(
    exec: &mut dyn Executor,
    config: &Configuration,
    layout: &PartitionLayout,
    mount: &MountState,
    kernel: &KernelPlan,
    strategy: BootStrategy,
) -> Result<BootOutcome> {
    let root = mount.mount_point.as_path();
    log::info!("Installing boot strategy: {}", strategy);

    let unlock = if mount.encrypted {
        Some(configure_initramfs(exec, root)?)
    } else {
        None
    };

    let entry = match strategy {
        BootStrategy::GrubBios | BootStrategy::GrubUefi => {
            install_grub(exec, config, layout, root, strategy, unlock)?;
            None
        }
        BootStrategy::DirectBoot => Some(install_direct_boot(exec, config, layout, root, kernel, unlock)?),
    };

    Ok(BootOutcome { strategy, entry })
}

/// Add the unlock hook and regenerate the initramfs images
fn configure_initramfs(exec: &mut dyn Executor, root: &Path) -> Result<UnlockHook> {
    let path = in_target(root, MKINITCPIO_CONF);
    let conf = exec.read_to_string(&path)?;
    let (updated, hook) = add_unlock_hook(&conf)
        .ok_or_else(|| InstallError::boot("no HOOKS line in mkinitcpio.conf"))?;

    log::info!("Adding {} hook to the initramfs", hook);
    exec.write_file(&path, &updated)?;
    exec.run_in(root, &Mkinitcpio)?
        .ensure_success_as("mkinitcpio", InstallError::BootRegistration)?;
    Ok(hook)
}

/// UUID of the raw root partition (the container itself when encrypted)
fn root_uuid(exec: &mut dyn Executor, layout: &PartitionLayout) -> Result<String> {
    let output = exec.run_tool(&Blkid {
        device: layout.root_partition.clone(),
    })?;
    output.ensure_success_as("blkid", InstallError::BootRegistration)?;

    let uuid = output.stdout.trim();
    if uuid.is_empty() {
        return Err(InstallError::boot(format!(
            "no UUID found for {}",
            layout.root_partition
        )));
    }
    Ok(uuid.to_string())
}

fn install_grub(
    exec: &mut dyn Executor,
    config: &Configuration,
    layout: &PartitionLayout,
    root: &Path,
    strategy: BootStrategy,
    unlock: Option<UnlockHook>,
) -> Result<()> {
    let target = match strategy {
        BootStrategy::GrubUefi => GrubTarget::Uefi {
            efi_directory: EFI_DIRECTORY.to_string(),
            bootloader_id: config.branding.name.clone(),
        },
        _ => GrubTarget::Bios {
            disk: layout.disk.clone(),
        },
    };

    let clause = match unlock {
        Some(hook) => Some(hook.clause(&root_uuid(exec, layout)?)),
        None => None,
    };

    // grub-install refuses an encrypted /boot unless cryptodisk is already enabled
    let defaults_path = in_target(root, GRUB_DEFAULTS);
    let defaults = exec.read_to_string(&defaults_path)?;
    exec.write_file(&defaults_path, &apply_grub_defaults(&defaults, clause.as_deref()))?;

    exec.run_in(root, &GrubInstall { target })?
        .ensure_success_as("grub-install", InstallError::BootRegistration)?;

    exec.run_in(
        root,
        &GrubMkconfig {
            output: GRUB_CFG.to_string(),
        },
    )?
    .ensure_success_as("grub-mkconfig", InstallError::BootRegistration)?;

    log::info!("GRUB installed");
    Ok(())
}

fn install_direct_boot(
    exec: &mut dyn Executor,
    config: &Configuration,
    layout: &PartitionLayout,
    root: &Path,
    kernel: &KernelPlan,
    unlock: Option<UnlockHook>,
) -> Result<DirectBootEntry> {
    let efi = layout
        .efi_partition
        .as_deref()
        .ok_or_else(|| InstallError::boot("direct boot needs an ESP"))?;
    let (disk, partition) = split_partition_path(efi)
        .ok_or_else(|| InstallError::boot(format!("cannot parse ESP device {efi}")))?;

    let uuid = root_uuid(exec, layout)?;
    let label = config.branding.name.clone();
    let entry = DirectBootEntry {
        disk,
        partition,
        label: label.clone(),
        cmdline: kernel_cmdline(&uuid, unlock),
    };

    let esp_dir = format!("{EFI_DIRECTORY}/EFI/{label}");
    exec.create_dir_all(&in_target(root, &esp_dir))?;

    let name = kernel.installed.package();
    for (file, context) in [
        (format!("vmlinuz-{name}"), "Copying kernel to ESP"),
        (format!("initramfs-{name}.img"), "Copying initramfs to ESP"),
    ] {
        exec.run_in(
            root,
            &Cp {
                source: format!("/boot/{file}"),
                dest: format!("{esp_dir}/{file}"),
                recursive: false,
            },
        )?
        .ensure_success_as(context, InstallError::BootRegistration)?;
    }

    exec.run_in(root, &entry.efibootmgr(name))?
        .ensure_success_as("efibootmgr", InstallError::BootRegistration)?;
    log::info!("Firmware boot entry '{}' created on {} partition {}", label, entry.disk, entry.partition);

    let targets = kernel.hook_targets();
    exec.write_file(&in_target(root, NMBL_HOOK), &nmbl_hook(&targets))?;
    let script = in_target(root, NMBL_UPDATE);
    exec.write_file(&script, &nmbl_update_script(&label, &targets))?;
    exec.set_mode(&script, 0o755)?;

    Ok(entry)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Action, DryRunExecutor};
    use crate::types::Kernel;
    use std::path::PathBuf;

    const GRUB_DEFAULTS_STOCK: &str = "\
GRUB_DEFAULT=0
GRUB_TIMEOUT=5
GRUB_DISTRIBUTOR=\"Arch\"
GRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet\"
GRUB_CMDLINE_LINUX=\"\"
";

    const MKINITCPIO_STOCK: &str = "\
MODULES=()
HOOKS=(base udev autodetect microcode modconf kms keyboard keymap consolefont block filesystems fsck)
";

    fn mounted(encrypted: bool) -> MountState {
        MountState {
            mount_point: PathBuf::from("/mnt"),
            root_device: if encrypted { mapped_device() } else { "/dev/sda2".to_string() },
            encrypted,
            esp_mounted: true,
        }
    }

    #[test]
    fn test_strategy_resolution() {
        assert_eq!(
            BootStrategy::resolve(Bootloader::Grub, PartitionScheme::GptWithEsp),
            (BootStrategy::GrubUefi, None)
        );
        assert_eq!(
            BootStrategy::resolve(Bootloader::Nmbl, PartitionScheme::GptWithEsp),
            (BootStrategy::DirectBoot, None)
        );
        let (strategy, warning) = BootStrategy::resolve(Bootloader::Nmbl, PartitionScheme::MbrLegacy);
        assert_eq!(strategy, BootStrategy::GrubBios);
        assert!(warning.is_some());
    }

    #[test]
    fn test_grub_defaults_hidden_zero_timeout() {
        let updated = apply_grub_defaults(GRUB_DEFAULTS_STOCK, None);
        assert!(updated.contains("GRUB_TIMEOUT=0\n"));
        assert!(updated.contains("GRUB_TIMEOUT_STYLE=hidden\n"));
        assert!(!updated.contains("GRUB_TIMEOUT=5"));
        assert!(!updated.contains("CRYPTODISK"));
    }

    #[test]
    fn test_grub_defaults_unlock_clause() {
        let updated = apply_grub_defaults(GRUB_DEFAULTS_STOCK, Some("cryptdevice=UUID=u:cryptroot"));
        assert!(updated.contains("GRUB_CMDLINE_LINUX=\"cryptdevice=UUID=u:cryptroot\"\n"));
        assert!(updated.contains("GRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet\"\n"));
        assert!(updated.contains("GRUB_ENABLE_CRYPTODISK=y\n"));

        // Running twice does not duplicate the clause
        let again = apply_grub_defaults(&updated, Some("cryptdevice=UUID=u:cryptroot"));
        assert_eq!(again.matches("cryptdevice").count(), 1);
    }

    #[test]
    fn test_unlock_hook_busybox() {
        let (conf, hook) = add_unlock_hook(MKINITCPIO_STOCK).unwrap();
        assert_eq!(hook, UnlockHook::Encrypt);
        assert!(conf.contains("block encrypt filesystems fsck)"));
        assert!(conf.starts_with("MODULES=()\n"));
    }

    #[test]
    fn test_unlock_hook_systemd() {
        let conf = "HOOKS=(base systemd autodetect block filesystems fsck)\n";
        let (updated, hook) = add_unlock_hook(conf).unwrap();
        assert_eq!(hook, UnlockHook::SdEncrypt);
        assert_eq!(updated, "HOOKS=(base systemd autodetect block sd-encrypt filesystems fsck)\n");
        assert_eq!(hook.clause("u"), "rd.luks.name=u=cryptroot");
        assert!(add_unlock_hook("MODULES=()\n").is_none());
    }

    #[test]
    fn test_kernel_cmdline() {
        assert_eq!(kernel_cmdline("abcd", None), "root=UUID=abcd rw quiet loglevel=3");
        assert_eq!(
            kernel_cmdline("abcd", Some(UnlockHook::Encrypt)),
            "cryptdevice=UUID=abcd:cryptroot root=/dev/mapper/cryptroot rw quiet loglevel=3"
        );
    }

    #[test]
    fn test_nmbl_hook_lists_every_kernel() {
        let hook = nmbl_hook(&["linux", "linux-cachyos"]);
        assert!(hook.contains("Target = linux\nTarget = linux-cachyos\n"));
        assert!(hook.contains("Exec = /usr/local/bin/nmbl-update\n"));
        assert!(hook.contains("When = PostTransaction\n"));

        let script = nmbl_update_script("Blunux", &["linux", "linux-cachyos"]);
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("ESP_DIR=/boot/efi/EFI/Blunux\n"));
        assert!(script.contains("for kernel in linux linux-cachyos; do\n"));
    }

    #[test]
    fn test_grub_uefi_install() {
        let config = Configuration::default();
        let layout = PartitionLayout::for_disk("/dev/sda", PartitionScheme::GptWithEsp);
        let mut exec = DryRunExecutor::new().with_file("/mnt/etc/default/grub", GRUB_DEFAULTS_STOCK);

        let outcome = install_bootloader(
            &mut exec,
            &config,
            &layout,
            &mounted(false),
            &KernelPlan::resolve(Kernel::Linux),
            BootStrategy::GrubUefi,
        )
        .unwrap();

        assert_eq!(outcome.entry, None);
        assert!(exec.ran(
            "arch-chroot /mnt grub-install --target=x86_64-efi --efi-directory=/boot/efi --bootloader-id=Blunux"
        ));
        assert!(exec.ran("arch-chroot /mnt grub-mkconfig -o /boot/grub/grub.cfg"));
        assert!(exec.file("/mnt/etc/default/grub").unwrap().contains("GRUB_TIMEOUT_STYLE=hidden"));
        assert!(!exec.ran("mkinitcpio"));
    }

    #[test]
    fn test_grub_bios_targets_disk() {
        let config = Configuration::default();
        let layout = PartitionLayout::for_disk("/dev/vda", PartitionScheme::MbrLegacy);
        let mut exec = DryRunExecutor::new();
        install_bootloader(
            &mut exec,
            &config,
            &layout,
            &mounted(false),
            &KernelPlan::resolve(Kernel::Linux),
            BootStrategy::GrubBios,
        )
        .unwrap();
        assert!(exec.ran("arch-chroot /mnt grub-install --target=i386-pc /dev/vda"));
    }

    #[test]
    fn test_encrypted_grub_enables_cryptodisk_before_install() {
        let config = Configuration::default();
        let layout = PartitionLayout::for_disk("/dev/sda", PartitionScheme::GptWithEsp);
        let mut exec = DryRunExecutor::new()
            .with_file("/mnt/etc/default/grub", GRUB_DEFAULTS_STOCK)
            .with_file("/mnt/etc/mkinitcpio.conf", MKINITCPIO_STOCK)
            .with_output("blkid", "3333\n");

        install_bootloader(
            &mut exec,
            &config,
            &layout,
            &mounted(true),
            &KernelPlan::resolve(Kernel::Linux),
            BootStrategy::GrubUefi,
        )
        .unwrap();

        let actions = exec.actions();
        let defaults = actions
            .iter()
            .position(|a| matches!(a, Action::WriteFile { path, contents }
                if path == Path::new("/mnt/etc/default/grub") && contents.contains("GRUB_ENABLE_CRYPTODISK=y")))
            .unwrap();
        let install = actions
            .iter()
            .position(|a| matches!(a, Action::Run(i) if i.program == "grub-install"))
            .unwrap();
        assert!(defaults < install);
        assert!(exec
            .file("/mnt/etc/default/grub")
            .unwrap()
            .contains("GRUB_CMDLINE_LINUX=\"cryptdevice=UUID=3333:cryptroot\""));
    }

    #[test]
    fn test_key_derivation_follows_strategy() {
        assert_eq!(BootStrategy::GrubUefi.key_derivation(), KeyDerivation::Pbkdf2);
        assert_eq!(BootStrategy::GrubBios.key_derivation(), KeyDerivation::Pbkdf2);
        assert_eq!(BootStrategy::DirectBoot.key_derivation(), KeyDerivation::Argon2id);
    }

    #[test]
    fn test_direct_boot_encrypted_nvme() {
        let config = Configuration::default();
        let layout = PartitionLayout::for_disk("/dev/nvme0n1", PartitionScheme::GptWithEsp);
        let mut exec = DryRunExecutor::new()
            .with_file("/mnt/etc/mkinitcpio.conf", MKINITCPIO_STOCK)
            .with_output("blkid", "1111-2222\n");

        let outcome = install_bootloader(
            &mut exec,
            &config,
            &layout,
            &mounted(true),
            &KernelPlan::resolve(Kernel::LinuxBore),
            BootStrategy::DirectBoot,
        )
        .unwrap();

        let entry = outcome.entry.unwrap();
        assert_eq!(entry.disk, "/dev/nvme0n1");
        assert_eq!(entry.partition, 1);
        assert!(exec.ran("blkid -s UUID -o value /dev/nvme0n1p2"));
        assert!(exec.position("mkinitcpio -P").unwrap() < exec.position("efibootmgr").unwrap());
        assert!(exec.ran("cp /boot/vmlinuz-linux /boot/efi/EFI/Blunux/vmlinuz-linux"));
        assert!(exec.ran("cp /boot/initramfs-linux.img /boot/efi/EFI/Blunux/initramfs-linux.img"));

        let efiboot = exec.invocations().into_iter().find(|i| i.program == "efibootmgr").unwrap();
        assert_eq!(
            efiboot.args.last().unwrap(),
            "cryptdevice=UUID=1111-2222:cryptroot root=/dev/mapper/cryptroot rw quiet loglevel=3 \
             initrd=\\EFI\\Blunux\\initramfs-linux.img"
        );
        assert!(exec
            .file("/mnt/etc/pacman.d/hooks/99-nmbl-kernel-update.hook")
            .unwrap()
            .contains("Target = linux-cachyos"));
        assert_eq!(exec.mode("/mnt/usr/local/bin/nmbl-update"), Some(0o755));
    }

    #[test]
    fn test_registration_failure_is_fatal() {
        let config = Configuration::default();
        let layout = PartitionLayout::for_disk("/dev/sda", PartitionScheme::GptWithEsp);
        let mut exec = DryRunExecutor::new()
            .with_output("blkid", "abcd\n")
            .fail_on("efibootmgr");

        let err = install_bootloader(
            &mut exec,
            &config,
            &layout,
            &mounted(false),
            &KernelPlan::resolve(Kernel::Linux),
            BootStrategy::DirectBoot,
        )
        .unwrap_err();
        assert!(matches!(err, InstallError::BootRegistration(_)));
        assert!(exec.file("/mnt/etc/pacman.d/hooks/99-nmbl-kernel-update.hook").is_none());
    }

    #[test]
    fn test_missing_uuid_is_fatal() {
        let config = Configuration::default();
        let layout = PartitionLayout::for_disk("/dev/sda", PartitionScheme::GptWithEsp);
        let mut exec = DryRunExecutor::new();
        let result = install_bootloader(
            &mut exec,
            &config,
            &layout,
            &mounted(false),
            &KernelPlan::resolve(Kernel::Linux),
            BootStrategy::DirectBoot,
        );
        assert!(result.is_err());
        assert!(!exec.ran("efibootmgr"));
    }
}
