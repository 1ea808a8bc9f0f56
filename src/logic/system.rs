//! System configuration: clock, identity, services and swap.
//!
//! Service enablement and clock setup are best-effort; identity files and the
//! swap file are not.

use std::path::Path;

use crate::config::Configuration;
use crate::engine::storage::MountState;
use crate::error::Result;
use crate::executor::{Executor, Invocation};
use crate::logic::resolver::resolve_services;
use crate::logic::{in_target, run_optional, Warnings};
use crate::tools::filesystem::{Dd, Mkswap};
use crate::tools::system::{Hwclock, Symlink, SystemctlEnable};
use crate::types::SwapMode;

/// Swap file location inside the installed system
pub const SWAPFILE: &str = "/swapfile";

/// fstab entry appended for the swap file
pub const SWAP_FSTAB_ENTRY: &str = "\n# Swap file\n/swapfile none swap defaults 0 0\n";

/// Contents of `/etc/hosts`
pub fn hosts_file(hostname: &str) -> String {
    format!(
        "127.0.0.1    localhost\n\
         ::1          localhost\n\
         127.0.1.1    {hostname}.localdomain {hostname}\n"
    )
}

/// Configure timezone, hostname, hosts, services and swap.
pub fn configure_system(
    exec: &mut dyn Executor,
    config: &Configuration,
    mount: &MountState,
    ram_mib: u64,
    warnings: &mut Warnings,
) -> Result<()> {
    let root = mount.mount_point.as_path();

    let zoneinfo = format!("/usr/share/zoneinfo/{}", config.locale.timezone.trim());
    log::info!("Setting timezone to {}", config.locale.timezone);
    run_optional(
        exec,
        &Invocation::tool(&Symlink {
            target: zoneinfo,
            link: "/etc/localtime".to_string(),
        })
        .in_chroot(root),
        warnings,
    );
    run_optional(exec, &Invocation::tool(&Hwclock).in_chroot(root), warnings);

    let hostname = config.install.hostname.trim();
    exec.write_file(&in_target(root, "/etc/hostname"), &format!("{hostname}\n"))?;
    exec.write_file(&in_target(root, "/etc/hosts"), &hosts_file(hostname))?;

    for unit in resolve_services(config) {
        log::info!("Enabling {}", unit);
        run_optional(
            exec,
            &Invocation::tool(&SystemctlEnable { unit }).in_chroot(root),
            warnings,
        );
    }

    setup_swap(exec, root, config.disk.swap, ram_mib)
}

/// Create, format and register the swap file. A failure here is fatal.
pub fn setup_swap(exec: &mut dyn Executor, root: &Path, mode: SwapMode, ram_mib: u64) -> Result<()> {
    let size_mib = mode.size_mib(ram_mib);
    if size_mib == 0 {
        log::info!("Swap: none");
        return Ok(());
    }

    log::info!("Swap: {} MiB file ({} mode)", size_mib, mode);
    let host_path = in_target(root, SWAPFILE);

    exec.run_tool(&Dd {
        output: host_path.display().to_string(),
        size_mib,
    })?
    .ensure_success("Creating swap file")?;
    exec.set_mode(&host_path, 0o600)?;

    exec.run_in(
        root,
        &Mkswap {
            path: SWAPFILE.to_string(),
        },
    )?
    .ensure_success("mkswap")?;

    exec.append_file(&in_target(root, "/etc/fstab"), SWAP_FSTAB_ENTRY)?;
    Ok(())
}
