//! Base package pass and mount table generation.

use crate::engine::storage::MountState;
use crate::error::{InstallError, Result};
use crate::executor::Executor;
use crate::logic::in_target;
use crate::tools::filesystem::Genfstab;
use crate::tools::packages::Pacstrap;

/// Install the base package set into the mounted tree in one bulk pass.
///
/// Any non-zero exit is fatal; nothing is retried.
pub fn install_base_system(exec: &mut dyn Executor, mount: &MountState, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Err(InstallError::package_install("empty package set"));
    }

    log::info!(
        "Installing {} packages into {}",
        packages.len(),
        mount.mount_point.display()
    );
    exec.run_tool(&Pacstrap {
        root: mount.mount_point.display().to_string(),
        packages: packages.to_vec(),
    })?
    .ensure_success_as("pacstrap", InstallError::PackageInstall)?;

    log::info!("Base system installed");
    Ok(())
}

/// Append UUID-based entries for everything mounted under the target to its fstab.
pub fn generate_fstab(exec: &mut dyn Executor, mount: &MountState) -> Result<()> {
    let output = exec.run_tool(&Genfstab {
        root: mount.mount_point.display().to_string(),
    })?;
    output.ensure_success_as("genfstab", InstallError::Mount)?;

    if output.stdout.trim().is_empty() {
        return Err(InstallError::mount("genfstab produced no entries"));
    }

    exec.append_file(&in_target(&mount.mount_point, "/etc/fstab"), &output.stdout)?;
    log::info!("fstab generated");
    Ok(())
}
