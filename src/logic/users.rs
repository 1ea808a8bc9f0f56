//! Accounts, credentials, privilege escalation and display-manager autologin.
//!
//! Credentials are piped to `chpasswd` on standard input; they never appear in
//! an argument vector, a log line or a file written by the installer.

use crate::config::Configuration;
use crate::engine::storage::MountState;
use crate::error::Result;
use crate::executor::Executor;
use crate::logic::in_target;
use crate::tools::system::{Chpasswd, Useradd};

/// Supplementary groups of the primary account
pub const USER_GROUPS: &[&str] = &["wheel", "audio", "video", "storage", "optical"];

pub const USER_SHELL: &str = "/bin/bash";

pub const SUDOERS_WHEEL: &str = "/etc/sudoers.d/wheel";

pub const AUTOLOGIN_CONF: &str = "/etc/sddm.conf.d/autologin.conf";

/// SDDM autologin fragment for `username` into a Plasma session
pub fn autologin_fragment(username: &str) -> String {
    format!("[Autologin]\nUser={username}\nSession=plasma\nRelogin=true\n")
}

/// Set the root credential, create the primary account, grant sudo and
/// optionally configure autologin.
pub fn configure_users(exec: &mut dyn Executor, config: &Configuration, mount: &MountState) -> Result<()> {
    let root = mount.mount_point.as_path();
    let username = config.install.username.trim();

    exec.run_in(
        root,
        &Chpasswd {
            username: "root".to_string(),
            password: config.install.root_password.clone(),
        },
    )?
    .ensure_success("Setting root password")?;

    log::info!("Creating user {}", username);
    exec.run_in(
        root,
        &Useradd {
            username: username.to_string(),
            groups: USER_GROUPS.iter().map(|g| g.to_string()).collect(),
            shell: USER_SHELL.to_string(),
        },
    )?
    .ensure_success("useradd")?;

    exec.run_in(
        root,
        &Chpasswd {
            username: username.to_string(),
            password: config.install.user_password.clone(),
        },
    )?
    .ensure_success("Setting user password")?;

    let sudoers = in_target(root, SUDOERS_WHEEL);
    exec.write_file(&sudoers, "%wheel ALL=(ALL:ALL) ALL\n")?;
    exec.set_mode(&sudoers, 0o440)?;

    if config.install.autologin {
        exec.write_file(&in_target(root, AUTOLOGIN_CONF), &autologin_fragment(username))?;
        log::info!("SDDM autologin configured for {}", username);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::executor::{Action, DryRunExecutor};
    use std::path::PathBuf;

    fn mounted() -> MountState {
        MountState {
            mount_point: PathBuf::from("/mnt"),
            root_device: "/dev/sda2".to_string(),
            encrypted: false,
            esp_mounted: true,
        }
    }

    fn test_config() -> Configuration {
        let mut config = Configuration::default();
        config.install.username = "alice".to_string();
        config.install.root_password = Secret::new("r00t-secret");
        config.install.user_password = Secret::new("alice-secret");
        config
    }

    #[test]
    fn test_users_and_sudo() {
        let mut exec = DryRunExecutor::new();
        configure_users(&mut exec, &test_config(), &mounted()).unwrap();

        assert!(exec.ran("arch-chroot /mnt useradd -m -G wheel,audio,video,storage,optical -s /bin/bash alice"));
        assert_eq!(exec.file("/mnt/etc/sudoers.d/wheel"), Some("%wheel ALL=(ALL:ALL) ALL\n"));
        assert_eq!(exec.mode("/mnt/etc/sudoers.d/wheel"), Some(0o440));
        assert_eq!(
            exec.file("/mnt/etc/sddm.conf.d/autologin.conf"),
            Some("[Autologin]\nUser=alice\nSession=plasma\nRelogin=true\n")
        );
    }

    #[test]
    fn test_credentials_only_travel_on_stdin() {
        let mut exec = DryRunExecutor::new();
        configure_users(&mut exec, &test_config(), &mounted()).unwrap();

        let payloads: Vec<String> = exec
            .invocations()
            .iter()
            .filter_map(|i| i.stdin.as_ref().map(|s| s.expose().to_string()))
            .collect();
        assert_eq!(payloads, vec!["root:r00t-secret\n", "alice:alice-secret\n"]);

        for action in exec.actions() {
            let shown = action.to_string();
            assert!(!shown.contains("secret"), "leaked in {shown}");
            if let Action::WriteFile { contents, .. } = action {
                assert!(!contents.contains("secret"));
            }
        }
    }

    #[test]
    fn test_no_autologin() {
        let mut config = test_config();
        config.install.autologin = false;
        let mut exec = DryRunExecutor::new();
        configure_users(&mut exec, &config, &mounted()).unwrap();
        assert_eq!(exec.file("/mnt/etc/sddm.conf.d/autologin.conf"), None);
    }

    #[test]
    fn test_useradd_failure_is_fatal() {
        let mut exec = DryRunExecutor::new().fail_on("useradd");
        assert!(configure_users(&mut exec, &test_config(), &mounted()).is_err());
        assert!(exec.file("/mnt/etc/sudoers.d/wheel").is_none());
    }
}
