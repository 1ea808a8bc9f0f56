//! Bootloader and firmware boot entry tools.

use crate::tool_args::ToolArgs;

/// Where `grub-install` puts the boot code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrubTarget {
    /// `--target=i386-pc <disk>`: MBR boot code
    Bios { disk: String },
    /// `--target=x86_64-efi`: EFI binary on the mounted ESP
    Uefi {
        efi_directory: String,
        bootloader_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrubInstall {
    pub target: GrubTarget,
}

impl ToolArgs for GrubInstall {
    fn program(&self) -> &'static str {
        "grub-install"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match &self.target {
            GrubTarget::Bios { disk } => vec!["--target=i386-pc".to_string(), disk.clone()],
            GrubTarget::Uefi {
                efi_directory,
                bootloader_id,
            } => vec![
                "--target=x86_64-efi".to_string(),
                format!("--efi-directory={efi_directory}"),
                format!("--bootloader-id={bootloader_id}"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrubMkconfig {
    pub output: String,
}

impl ToolArgs for GrubMkconfig {
    fn program(&self) -> &'static str {
        "grub-mkconfig"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-o".to_string(), self.output.clone()]
    }
}

/// `efibootmgr --create`: register a firmware boot entry for an EFISTUB kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Efibootmgr {
    pub disk: String,
    pub partition: u32,
    pub label: String,
    /// ESP-relative loader path with backslashes, e.g. `\EFI\Blunux\vmlinuz-linux`
    pub loader: String,
    /// Kernel command line passed as the entry's unicode data
    pub cmdline: String,
}

impl ToolArgs for Efibootmgr {
    fn program(&self) -> &'static str {
        "efibootmgr"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--create".to_string(),
            "--disk".to_string(),
            self.disk.clone(),
            "--part".to_string(),
            self.partition.to_string(),
            "--label".to_string(),
            self.label.clone(),
            "--loader".to_string(),
            self.loader.clone(),
            "--unicode".to_string(),
            self.cmdline.clone(),
        ]
    }
}
