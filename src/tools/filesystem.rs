//! Filesystem creation, mounting, swap and fstab tools.

use crate::tool_args::ToolArgs;

/// `mkfs.fat -F32`, used for the ESP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsFat {
    pub device: String,
}

impl ToolArgs for MkfsFat {
    fn program(&self) -> &'static str {
        "mkfs.fat"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-F32".to_string(), self.device.clone()]
    }
}

/// `mkfs.ext4 -F`, used for the root filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsExt4 {
    pub device: String,
}

impl ToolArgs for MkfsExt4 {
    fn program(&self) -> &'static str {
        "mkfs.ext4"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-F".to_string(), self.device.clone()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
}

impl ToolArgs for Mount {
    fn program(&self) -> &'static str {
        "mount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.source.clone(), self.target.clone()]
    }
}

/// Zero-fill a file of a fixed size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dd {
    pub output: String,
    pub size_mib: u64,
}

impl ToolArgs for Dd {
    fn program(&self) -> &'static str {
        "dd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "if=/dev/zero".to_string(),
            format!("of={}", self.output),
            "bs=1M".to_string(),
            format!("count={}", self.size_mib),
            "status=none".to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mkswap {
    pub path: String,
}

impl ToolArgs for Mkswap {
    fn program(&self) -> &'static str {
        "mkswap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.path.clone()]
    }
}

/// `genfstab -U <root>`; output is appended to the target's fstab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genfstab {
    pub root: String,
}

impl ToolArgs for Genfstab {
    fn program(&self) -> &'static str {
        "genfstab"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-U".to_string(), self.root.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkfs_args() {
        let fat = MkfsFat {
            device: "/dev/sda1".to_string(),
        };
        assert_eq!(fat.program(), "mkfs.fat");
        assert_eq!(fat.to_cli_args(), vec!["-F32", "/dev/sda1"]);

        let ext4 = MkfsExt4 {
            device: "/dev/mapper/cryptroot".to_string(),
        };
        assert_eq!(ext4.to_cli_args(), vec!["-F", "/dev/mapper/cryptroot"]);
    }

    #[test]
    fn test_dd_swapfile() {
        let dd = Dd {
            output: "/mnt/swapfile".to_string(),
            size_mib: 8192,
        };
        assert_eq!(
            dd.to_cli_args(),
            vec!["if=/dev/zero", "of=/mnt/swapfile", "bs=1M", "count=8192", "status=none"]
        );
    }
}
