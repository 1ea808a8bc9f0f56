//! Package & Service Resolver
//!
//! Translates configuration choices into concrete package names and systemd
//! service names. Pure logic: no I/O, no side effects.
//!
//! # Resolution Rules
//!
//! | Source             | Resolved To |
//! |--------------------|-------------|
//! | always             | `BASE_PACKAGES` + fonts |
//! | `KernelPlan`       | installed kernel + headers |
//! | boot strategy      | GRUB packages for either GRUB state |
//! | `packages.desktop` | Plasma set; enables sddm and cups |
//! | locales            | CJK fonts, Korean fonts |
//! | input method       | engine packages + language addons |
//!
//! Kernels outside the base repositories are replaced by the default kernel
//! for the base pass and installed after first boot.

use std::fmt;

use crate::config::Configuration;
use crate::logic::boot::BootStrategy;
use crate::profiles::{
    bootloader_packages, font_packages, input_method_packages, services, BASE_PACKAGES,
    DESKTOP_PACKAGES,
};
use crate::types::{InputMethodEngine, Kernel};

// ============================================================================
// Kernel Plan
// ============================================================================

/// Which kernel the base pass installs and which one, if any, is deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPlan {
    pub requested: Kernel,
    /// Installed by pacstrap; boots the system the first time
    pub installed: Kernel,
    /// Installed by `setup-linux-bore.sh` after first boot
    pub deferred: Option<Kernel>,
}

impl KernelPlan {
    pub fn resolve(requested: Kernel) -> Self {
        if requested.in_base_repo() {
            Self {
                requested,
                installed: requested,
                deferred: None,
            }
        } else {
            Self {
                requested,
                installed: Kernel::default(),
                deferred: Some(requested),
            }
        }
    }

    pub fn is_substituted(&self) -> bool {
        self.deferred.is_some()
    }

    /// Kernel packages whose upgrades the direct-boot hook must follow
    pub fn hook_targets(&self) -> Vec<&'static str> {
        let mut targets = vec![self.installed.package()];
        if let Some(deferred) = self.deferred {
            targets.push(deferred.package());
        }
        targets
    }
}

impl fmt::Display for KernelPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.deferred {
            Some(deferred) => write!(
                f,
                "{} (now), {} after first boot",
                self.installed.package(),
                deferred.package()
            ),
            None => write!(f, "{}", self.installed.package()),
        }
    }
}

// ============================================================================
// Package Resolution
// ============================================================================

/// Resolve the base package set.
///
/// # Returns
///
/// A deduplicated, sorted list of package names for pacstrap.
pub fn resolve_packages(
    config: &Configuration,
    kernel: &KernelPlan,
    strategy: BootStrategy,
) -> Vec<String> {
    let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|s| s.to_string()).collect();

    packages.push(kernel.installed.package().to_string());
    packages.push(kernel.installed.headers_package());

    if strategy.is_grub() {
        packages.extend(bootloader_packages::GRUB.iter().map(|s| s.to_string()));
    } else {
        packages.extend(bootloader_packages::DIRECT_BOOT.iter().map(|s| s.to_string()));
    }

    if config.packages.desktop {
        packages.extend(DESKTOP_PACKAGES.iter().map(|s| s.to_string()));
    }

    packages.extend(resolve_font_packages(config));
    packages.extend(resolve_input_method_packages(config));

    packages.sort();
    packages.dedup();
    packages
}

/// Fonts for the requested locales
pub fn resolve_font_packages(config: &Configuration) -> Vec<String> {
    let mut packages: Vec<&str> = font_packages::COMMON.to_vec();
    if config.has_cjk_language() {
        packages.extend_from_slice(font_packages::CJK);
    }
    if config.has_language("ko") {
        packages.extend_from_slice(font_packages::KOREAN);
    }
    packages.into_iter().map(String::from).collect()
}

/// Engine packages plus addons for the requested languages
pub fn resolve_input_method_packages(config: &Configuration) -> Vec<String> {
    let Some(engine) = config.input_method_engine() else {
        return Vec::new();
    };

    let mut packages: Vec<&str> = Vec::new();
    match engine {
        InputMethodEngine::Kime => packages.extend_from_slice(input_method_packages::KIME),
        InputMethodEngine::Fcitx5 => {
            packages.extend_from_slice(input_method_packages::FCITX5);
            if config.has_language("ko") {
                packages.extend_from_slice(input_method_packages::FCITX5_KOREAN);
            }
            if config.has_language("ja") {
                packages.extend_from_slice(input_method_packages::FCITX5_JAPANESE);
            }
            if config.has_language("zh") {
                packages.extend_from_slice(input_method_packages::FCITX5_CHINESE);
            }
        }
        InputMethodEngine::Ibus => {
            packages.extend_from_slice(input_method_packages::IBUS);
            if config.has_language("ko") {
                packages.extend_from_slice(input_method_packages::IBUS_KOREAN);
            }
            if config.has_language("ja") {
                packages.extend_from_slice(input_method_packages::IBUS_JAPANESE);
            }
        }
    }
    packages.into_iter().map(String::from).collect()
}

// ============================================================================
// Service Resolution
// ============================================================================

/// Services enabled during system configuration, in enable order.
///
/// Every one of them is best-effort.
pub fn resolve_services(config: &Configuration) -> Vec<String> {
    let mut result = vec![services::NETWORK.to_string()];
    if config.packages.desktop {
        result.push(services::DISPLAY_MANAGER.to_string());
        result.push(services::PRINTING.to_string());
    }
    result
}

// ============================================================================
// Tests
// ============================================================================
