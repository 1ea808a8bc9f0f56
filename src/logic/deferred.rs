//! Post-first-boot scripts.
//!
//! Work that cannot happen in the base pass (AUR packages, kernels outside the
//! official repositories, diagnostics) is written as shell scripts into the
//! account's home. Each script is self-contained and safe to run again.

use crate::config::Configuration;
use crate::logic::boot::{BootOutcome, DirectBootEntry};
use crate::logic::resolver::KernelPlan;
use crate::tool_args::ToolArgs;
use crate::types::{InputMethodEngine, Kernel};

/// Where per-package install scripts and diagnostics are published
pub const BASE_URL: &str = "https://jaewoojoung.github.io/linux";

/// A script to be written into the account's home
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredScript {
    /// File name relative to the home directory
    pub name: &'static str,
    pub contents: String,
}

const YAY_BOOTSTRAP: &str = r#"if ! command -v yay &> /dev/null; then
    echo "Installing yay AUR helper..."
    sudo pacman -S --needed --noconfirm base-devel git
    BUILDDIR=$(mktemp -d)
    git clone https://aur.archlinux.org/yay-bin.git "$BUILDDIR/yay-bin"
    (cd "$BUILDDIR/yay-bin" && makepkg -si --noconfirm)
    rm -rf "$BUILDDIR"
fi
"#;

/// Quote a word for bash unless it is made only of safe characters
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/_.-=:,+@".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn command_line<T: ToolArgs>(args: &T) -> String {
    std::iter::once(args.program().to_string())
        .chain(args.to_cli_args().iter().map(|a| shell_quote(a)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `install-packages.sh`: optional packages, one downloaded script each
pub fn package_script(packages: &[String]) -> Option<DeferredScript> {
    if packages.is_empty() {
        return None;
    }

    let mut script = format!(
        r#"#!/bin/bash
# Install the optional packages selected at installation time.
# Safe to run again; only failed packages need another pass.

BASE_URL="{BASE_URL}"

{YAY_BOOTSTRAP}
FAILED_PACKAGES=()

install_package() {{
    local pkg="$1"
    local script="/tmp/blunux-install-$pkg.sh"
    echo "=========================================="
    echo "  Installing: $pkg"
    echo "=========================================="
    if curl -fsSL "$BASE_URL/$pkg.sh" -o "$script"; then
        if bash "$script"; then
            echo "$pkg installed successfully"
        else
            echo "WARNING: $pkg installation failed"
            FAILED_PACKAGES+=("$pkg")
        fi
        rm -f "$script"
    else
        echo "WARNING: Failed to download $pkg.sh"
        FAILED_PACKAGES+=("$pkg")
    fi
    echo ""
}}

"#
    );

    for package in packages {
        script.push_str(&format!("install_package {}\n", shell_quote(package)));
    }

    script.push_str(
        r#"
if [ ${#FAILED_PACKAGES[@]} -gt 0 ]; then
    echo "The following packages failed to install:"
    for pkg in "${FAILED_PACKAGES[@]}"; do
        echo "  - $pkg"
    done
    echo ""
    echo "Retry with: bash ~/install-packages.sh"
    exit 1
fi
echo "All packages installed successfully!"
echo "Please log out and log back in for changes to take effect."
"#,
    );

    Some(DeferredScript {
        name: "install-packages.sh",
        contents: script,
    })
}

/// `kime-install.sh`: kime is only available from the AUR
pub fn kime_script() -> DeferredScript {
    DeferredScript {
        name: "kime-install.sh",
        contents: format!(
            r#"#!/bin/bash
# Install the kime input method after first boot.
set -e

{YAY_BOOTSTRAP}
yay -S --noconfirm --needed kime-git

echo "kime installed. Log out and back in to start it."
"#
        ),
    }
}

/// `setup-linux-bore.sh`: install the deferred kernel and make it bootable
pub fn kernel_script(kernel: Kernel, entry: Option<&DirectBootEntry>) -> DeferredScript {
    let package = kernel.package();
    let headers = kernel.headers_package();

    let boot_update = match entry {
        Some(entry) => {
            let mut firmware_entry = entry.efibootmgr(package);
            firmware_entry.label = format!("{} ({package})", entry.label);
            format!(
                "echo \"Copying kernels to the ESP...\"\n\
                 sudo /usr/local/bin/nmbl-update\n\
                 if ! sudo efibootmgr | grep -qF {label}; then\n\
                 \x20   sudo {create}\n\
                 fi\n",
                label = shell_quote(&firmware_entry.label),
                create = command_line(&firmware_entry),
            )
        }
        None => "echo \"Updating GRUB configuration...\"\n\
                 sudo grub-mkconfig -o /boot/grub/grub.cfg\n"
            .to_string(),
    };

    DeferredScript {
        name: "setup-linux-bore.sh",
        contents: format!(
            r#"#!/bin/bash
# Install the {package} kernel after first boot.
set -e

{YAY_BOOTSTRAP}
echo "Installing {package} (this may take a while)..."
yay -S --noconfirm --needed {package} {headers}

{boot_update}
echo "Reboot to use the {package} kernel."
"#
        ),
    }
}

/// `syschk.sh`: download and run the system check
pub fn syschk_script() -> DeferredScript {
    DeferredScript {
        name: "syschk.sh",
        contents: format!(
            r#"#!/bin/bash
# Download and run the system check.
set -e

SYSCHK_URL="{BASE_URL}/syschk.jl"
SYSCHK_FILE="$(dirname "$0")/syschk.jl"

curl -fsSL "$SYSCHK_URL" -o "$SYSCHK_FILE"
julia "$SYSCHK_FILE"
"#
        ),
    }
}

/// Every deferred script this installation needs
pub fn deferred_scripts(config: &Configuration, kernel: &KernelPlan, boot: &BootOutcome) -> Vec<DeferredScript> {
    let mut scripts = Vec::new();

    if let Some(script) = package_script(&config.packages.optional) {
        scripts.push(script);
    }
    if config.input_method_engine() == Some(InputMethodEngine::Kime) {
        scripts.push(kime_script());
    }
    if let Some(deferred) = kernel.deferred {
        scripts.push(kernel_script(deferred, boot.entry.as_ref()));
    }
    scripts.push(syschk_script());

    scripts
}
