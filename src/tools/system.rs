//! System configuration tools, mostly run inside the target root.

use crate::config::Secret;
use crate::tool_args::ToolArgs;

/// `chpasswd`, fed one `name:password` record on stdin
#[derive(Debug, Clone)]
pub struct Chpasswd {
    pub username: String,
    pub password: Secret,
}

impl ToolArgs for Chpasswd {
    fn program(&self) -> &'static str {
        "chpasswd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn stdin(&self) -> Option<Secret> {
        Some(Secret::new(format!(
            "{}:{}\n",
            self.username,
            self.password.expose()
        )))
    }
}

/// `useradd -m -G <groups> -s <shell> <name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Useradd {
    pub username: String,
    pub groups: Vec<String>,
    pub shell: String,
}

impl ToolArgs for Useradd {
    fn program(&self) -> &'static str {
        "useradd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-m".to_string(),
            "-G".to_string(),
            self.groups.join(","),
            "-s".to_string(),
            self.shell.clone(),
            self.username.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemctlEnable {
    pub unit: String,
}

impl ToolArgs for SystemctlEnable {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["enable".to_string(), self.unit.clone()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleGen;

impl ToolArgs for LocaleGen {
    fn program(&self) -> &'static str {
        "locale-gen"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// `hwclock --systohc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hwclock;

impl ToolArgs for Hwclock {
    fn program(&self) -> &'static str {
        "hwclock"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--systohc".to_string()]
    }
}

/// `ln -sf <target> <link>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    pub target: String,
    pub link: String,
}

impl ToolArgs for Symlink {
    fn program(&self) -> &'static str {
        "ln"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-sf".to_string(), self.target.clone(), self.link.clone()]
    }
}

/// `mkinitcpio -P`: regenerate every preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mkinitcpio;

impl ToolArgs for Mkinitcpio {
    fn program(&self) -> &'static str {
        "mkinitcpio"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-P".to_string()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cp {
    pub source: String,
    pub dest: String,
    pub recursive: bool,
}

impl ToolArgs for Cp {
    fn program(&self) -> &'static str {
        "cp"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.recursive {
            args.push("-r".to_string());
        }
        args.push(self.source.clone());
        args.push(self.dest.clone());
        args
    }
}

/// `chown [-R] <uid>:<gid> <path>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chown {
    pub uid: u32,
    pub gid: u32,
    pub path: String,
    pub recursive: bool,
}

impl ToolArgs for Chown {
    fn program(&self) -> &'static str {
        "chown"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.recursive {
            args.push("-R".to_string());
        }
        args.push(format!("{}:{}", self.uid, self.gid));
        args.push(self.path.clone());
        args
    }
}

/// `lspci -nn`: PCI devices with vendor/device IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lspci;

impl ToolArgs for Lspci {
    fn program(&self) -> &'static str {
        "lspci"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-nn".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chpasswd_payload() {
        let args = Chpasswd {
            username: "root".to_string(),
            password: Secret::new("toor"),
        };
        assert!(args.to_cli_args().is_empty());
        assert_eq!(args.stdin().map(|s| s.expose().to_string()), Some("root:toor\n".to_string()));
    }

    #[test]
    fn test_useradd_groups() {
        let args = Useradd {
            username: "alice".to_string(),
            groups: vec!["wheel".to_string(), "audio".to_string()],
            shell: "/bin/bash".to_string(),
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["-m", "-G", "wheel,audio", "-s", "/bin/bash", "alice"]
        );
    }

    #[test]
    fn test_chown_recursive() {
        let args = Chown {
            uid: 1000,
            gid: 1000,
            path: "/home/alice".to_string(),
            recursive: true,
        };
        assert_eq!(args.to_cli_args(), vec!["-R", "1000:1000", "/home/alice"]);
    }
}
