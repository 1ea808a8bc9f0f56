//! Logic modules: everything that happens inside the mounted target.
//!
//! Each module implements one or two pipeline stages against a `MountState`.
//! All side effects go through the `Executor`; pure parts (package lists,
//! file contents, command lines) are split out so they can be tested alone.
//!
//! # Modules
//!
//! - `resolver`: package and service resolution, kernel substitution
//! - `base`: base package pass and fstab generation
//! - `system`: timezone, hostname, services, swap
//! - `drivers`: PCI hardware detection and driver installation
//! - `locale`: locale generation and input-method environment
//! - `users`: accounts, credentials, sudo, autologin
//! - `boot`: GRUB and direct-boot strategies
//! - `deferred`: post-first-boot scripts
//! - `finalize`: branding, user files, ownership, unmount

pub mod base;
pub mod boot;
pub mod deferred;
pub mod drivers;
pub mod finalize;
pub mod locale;
pub mod resolver;
pub mod system;
pub mod users;

use std::path::{Path, PathBuf};

use crate::executor::{Executor, Invocation};

/// Map an absolute path inside the installed system onto the mounted tree.
pub fn in_target(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// Non-fatal problems collected for the final report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Warnings(Vec<String>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a warning and keep it for the report
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.0.push(message);
    }

    /// Keep an already-logged warning for the report
    pub fn record(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Run a tool whose failure becomes a report warning instead of an error
pub fn run_optional(exec: &mut dyn Executor, invocation: &Invocation, warnings: &mut Warnings) -> bool {
    let ok = exec.run_best_effort(invocation);
    if !ok {
        warnings.record(format!("{} failed", invocation.context()));
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;

    #[test]
    fn test_in_target_strips_root() {
        assert_eq!(
            in_target(Path::new("/mnt"), "/etc/hostname"),
            PathBuf::from("/mnt/etc/hostname")
        );
        assert_eq!(
            in_target(Path::new("/mnt"), "etc/hosts"),
            PathBuf::from("/mnt/etc/hosts")
        );
    }

    #[test]
    fn test_run_optional_records_failure() {
        let mut exec = DryRunExecutor::new().fail_on("systemctl");
        let mut warnings = Warnings::new();
        let ok = run_optional(
            &mut exec,
            &Invocation::new("systemctl", vec!["enable".into(), "cups".into()]),
            &mut warnings,
        );
        assert!(!ok);
        assert_eq!(warnings.iter().next().map(String::as_str), Some("systemctl enable failed"));
    }
}
