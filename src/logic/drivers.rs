//! Hardware driver detection.
//!
//! Reads `lspci -nn` on the host (the hardware is the same one the target
//! will boot on) and installs GPU and wireless driver packages in the chroot.
//! The whole stage is best-effort: mesa from the base set always works.

use std::path::Path;

use strum::Display;

use crate::engine::storage::MountState;
use crate::error::{InstallError, Result};
use crate::executor::Executor;
use crate::logic::in_target;
use crate::profiles::{gpu_packages, is_multilib};
use crate::tools::packages::Pacman;
use crate::tools::system::Lspci;

/// Hardware that needs packages beyond the base set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Driver {
    #[strum(serialize = "NVIDIA GPU")]
    Nvidia,
    #[strum(serialize = "AMD GPU")]
    Amd,
    #[strum(serialize = "Intel GPU")]
    Intel,
    #[strum(serialize = "Broadcom wireless")]
    Broadcom,
}

impl Driver {
    pub fn packages(self) -> &'static [&'static str] {
        match self {
            Self::Nvidia => gpu_packages::NVIDIA,
            Self::Amd => gpu_packages::AMD,
            Self::Intel => gpu_packages::INTEL,
            Self::Broadcom => gpu_packages::BROADCOM,
        }
    }
}

fn is_display_device(line: &str) -> bool {
    line.contains("vga compatible") || line.contains("3d controller") || line.contains("display controller")
}

fn is_network_device(line: &str) -> bool {
    line.contains("network controller") || line.contains("wireless") || line.contains("bcm43")
}

/// Match `lspci -nn` lines to drivers. Each driver appears at most once.
pub fn detect_drivers(lspci: &str) -> Vec<Driver> {
    let mut drivers = Vec::new();
    let mut add = |driver: Driver| {
        if !drivers.contains(&driver) {
            drivers.push(driver);
        }
    };

    for line in lspci.lines().map(str::to_lowercase) {
        if is_display_device(&line) {
            if line.contains("nvidia") {
                add(Driver::Nvidia);
            }
            if line.contains("[amd/ati]") || line.contains("radeon") || line.contains("advanced micro devices") {
                add(Driver::Amd);
            }
            if line.contains("intel") {
                add(Driver::Intel);
            }
        }
        if is_network_device(&line) && line.contains("broadcom") {
            add(Driver::Broadcom);
        }
    }

    drivers
}

/// Packages for `drivers` in detection order, each listed once
pub fn driver_packages(drivers: &[Driver]) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();
    for package in drivers.iter().flat_map(|d| d.packages().iter()) {
        if !packages.iter().any(|p| p == package) {
            packages.push(package.to_string());
        }
    }
    packages
}

/// Returns true if `[multilib]` is an active section of pacman.conf
pub fn multilib_enabled(pacman_conf: &str) -> bool {
    pacman_conf.lines().any(|l| l.trim() == "[multilib]")
}

/// Uncomment the `[multilib]` section header and its `Include` line
pub fn enable_multilib(pacman_conf: &str) -> String {
    let mut out = String::with_capacity(pacman_conf.len());
    let mut in_section = false;

    for line in pacman_conf.lines() {
        let trimmed = line.trim();
        if trimmed == "#[multilib]" {
            in_section = true;
            out.push_str("[multilib]\n");
            continue;
        }
        if in_section {
            if let Some(include) = trimmed.strip_prefix('#').filter(|l| l.trim_start().starts_with("Include")) {
                out.push_str(include.trim_start());
                out.push('\n');
                in_section = false;
                continue;
            }
            if trimmed.starts_with('[') || trimmed.starts_with("#[") {
                in_section = false;
            }
        }
        out.push_str(line);
        out.push('\n');
    }

    out
}

/// Detect hardware and install its drivers. Returns what was detected.
///
/// When 32-bit packages are needed the multilib repository is switched on
/// first; if the install still fails, it is retried without them.
pub fn install_drivers(exec: &mut dyn Executor, mount: &MountState) -> Result<Vec<Driver>> {
    let root = mount.mount_point.as_path();

    let output = exec.run_tool(&Lspci)?;
    output.ensure_success("lspci")?;

    let drivers = detect_drivers(&output.stdout);
    if drivers.is_empty() {
        log::info!("No dedicated GPU or wireless hardware detected, mesa is enough");
        return Ok(drivers);
    }
    for driver in &drivers {
        log::info!("Detected {}", driver);
    }

    let mut packages = driver_packages(&drivers);

    if packages.iter().any(|p| is_multilib(p)) && !ensure_multilib(exec, root)? {
        log::warn!("multilib unavailable, skipping 32-bit driver packages");
        packages.retain(|p| !is_multilib(p));
    }

    let installed = exec.run_in(root, &Pacman::Install { packages: packages.clone() })?;
    if installed.success {
        log::info!("Hardware drivers installed");
        return Ok(drivers);
    }

    let native: Vec<String> = packages.iter().filter(|p| !is_multilib(p)).cloned().collect();
    if native.len() == packages.len() || native.is_empty() {
        return installed
            .ensure_success("Installing drivers")
            .map(|_| drivers);
    }

    log::warn!("Driver install failed, retrying without 32-bit packages");
    exec.run_in(root, &Pacman::Install { packages: native })?
        .ensure_success("Installing drivers")
        .map_err(|e| InstallError::package_install(e.to_string()))?;
    Ok(drivers)
}

/// Make sure `[multilib]` is enabled in the target. Returns false if it could not be.
fn ensure_multilib(exec: &mut dyn Executor, root: &Path) -> Result<bool> {
    let conf_path = in_target(root, "/etc/pacman.conf");
    let conf = exec.read_to_string(&conf_path)?;
    if multilib_enabled(&conf) {
        return Ok(true);
    }

    let updated = enable_multilib(&conf);
    if !multilib_enabled(&updated) {
        return Ok(false);
    }

    log::info!("Enabling multilib repository for 32-bit driver support");
    exec.write_file(&conf_path, &updated)?;
    Ok(exec.run_in(root, &Pacman::Refresh)?.success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;
    use std::path::PathBuf;

    const LSPCI_NVIDIA_LAPTOP: &str = "\
00:00.0 Host bridge [0600]: Intel Corporation Device [8086:4621] (rev 02)
00:02.0 VGA compatible controller [0300]: Intel Corporation Alder Lake-P GT2 [8086:46a6]
01:00.0 3D controller [0302]: NVIDIA Corporation GA107M [GeForce RTX 3050 Mobile] [10de:25a2]
02:00.0 Network controller [0280]: Intel Corporation Wi-Fi 6 AX201 [8086:a0f0]
";

    const PACMAN_CONF: &str = "\
[core]
Include = /etc/pacman.d/mirrorlist

#[multilib-testing]
#Include = /etc/pacman.d/mirrorlist

#[multilib]
#Include = /etc/pacman.d/mirrorlist
";

    fn mounted() -> MountState {
        MountState {
            mount_point: PathBuf::from("/mnt"),
            root_device: "/dev/sda2".to_string(),
            encrypted: false,
            esp_mounted: true,
        }
    }

    #[test]
    fn test_detect_hybrid_laptop() {
        let drivers = detect_drivers(LSPCI_NVIDIA_LAPTOP);
        assert_eq!(drivers, vec![Driver::Intel, Driver::Nvidia]);
    }

    #[test]
    fn test_intel_chipset_alone_is_not_a_gpu() {
        let lspci = "00:1f.3 Audio device [0403]: Intel Corporation Device [8086:51c8]\n\
                     03:00.0 VGA compatible controller [0300]: Advanced Micro Devices, Inc. [AMD/ATI] Navi 23 [1002:73ff]\n";
        assert_eq!(detect_drivers(lspci), vec![Driver::Amd]);
    }

    #[test]
    fn test_detect_broadcom_wireless() {
        let lspci = "03:00.0 Network controller [0280]: Broadcom Inc. and subsidiaries BCM4360 802.11ac Wireless [14e4:43a0]\n";
        assert_eq!(detect_drivers(lspci), vec![Driver::Broadcom]);
    }

    #[test]
    fn test_driver_packages_listed_once_in_order() {
        let packages = driver_packages(&[Driver::Intel, Driver::Nvidia, Driver::Intel]);
        assert_eq!(packages.first().map(String::as_str), Some("vulkan-intel"));
        assert_eq!(packages.iter().filter(|p| *p == "vulkan-intel").count(), 1);
        assert_eq!(packages.iter().filter(|p| *p == "nvidia-utils").count(), 1);
        assert_eq!(
            packages.len(),
            gpu_packages::INTEL.len() + gpu_packages::NVIDIA.len()
        );
    }

    #[test]
    fn test_enable_multilib_only_touches_its_section() {
        assert!(!multilib_enabled(PACMAN_CONF));
        let updated = enable_multilib(PACMAN_CONF);
        assert!(multilib_enabled(&updated));
        assert!(updated.contains("#[multilib-testing]\n#Include = /etc/pacman.d/mirrorlist\n"));
        assert!(updated.ends_with("[multilib]\nInclude = /etc/pacman.d/mirrorlist\n"));
    }

    #[test]
    fn test_install_enables_multilib_first() {
        let mut exec = DryRunExecutor::new()
            .with_output("lspci", LSPCI_NVIDIA_LAPTOP)
            .with_file("/mnt/etc/pacman.conf", PACMAN_CONF);
        let drivers = install_drivers(&mut exec, &mounted()).unwrap();
        assert_eq!(drivers.len(), 2);

        let refresh = exec.position("pacman -Sy --noconfirm").unwrap();
        let install = exec.position("pacman -S --noconfirm --needed vulkan-intel").unwrap();
        assert!(refresh < install);
        assert!(multilib_enabled(exec.file("/mnt/etc/pacman.conf").unwrap()));
    }

    #[test]
    fn test_install_retries_without_lib32() {
        let mut exec = DryRunExecutor::new()
            .with_output("lspci", LSPCI_NVIDIA_LAPTOP)
            .with_file("/mnt/etc/pacman.conf", "[multilib]\nInclude = /etc/pacman.d/mirrorlist\n")
            .fail_on_args("pacman", "lib32-");
        install_drivers(&mut exec, &mounted()).unwrap();

        let last = exec.command_lines().pop().unwrap();
        assert!(last.contains("nvidia-utils"));
        assert!(!last.contains("lib32-"));
    }

    #[test]
    fn test_no_hardware_installs_nothing() {
        let mut exec = DryRunExecutor::new().with_output("lspci", "00:00.0 Host bridge [0600]: Intel\n");
        assert!(install_drivers(&mut exec, &mounted()).unwrap().is_empty());
        assert_eq!(exec.command_lines(), vec!["lspci -nn"]);
    }
}
