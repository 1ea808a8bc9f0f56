//! LUKS container tools.
//!
//! Passphrases are NEVER passed in the argument vector. `cryptsetup` reads
//! them from standard input via `--key-file -`, exactly as typed, without a
//! trailing newline, so the same passphrase unlocks the container at boot.

use strum::Display;

use crate::config::Secret;
use crate::tool_args::ToolArgs;

/// Fixed mapper name of the unlocked root container
pub const MAPPER_NAME: &str = "cryptroot";

/// Path of the mapped device exposed by an open container
pub fn mapped_device() -> String {
    format!("/dev/mapper/{MAPPER_NAME}")
}

/// Key derivation of a new LUKS2 keyslot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum KeyDerivation {
    /// cryptsetup's default; unlocked by the initramfs only
    #[default]
    #[strum(serialize = "argon2id")]
    Argon2id,
    /// Readable by GRUB's cryptodisk module
    #[strum(serialize = "pbkdf2")]
    Pbkdf2,
}

/// `cryptsetup luksFormat --type luks2`
#[derive(Debug, Clone)]
pub struct CryptsetupFormat {
    pub device: String,
    pub passphrase: Secret,
    pub kdf: KeyDerivation,
}

impl ToolArgs for CryptsetupFormat {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "luksFormat".to_string(),
            "--type".to_string(),
            "luks2".to_string(),
        ];
        if self.kdf != KeyDerivation::default() {
            args.push("--pbkdf".to_string());
            args.push(self.kdf.to_string());
        }
        args.extend([
            "--batch-mode".to_string(),
            "--key-file".to_string(),
            "-".to_string(),
            self.device.clone(),
        ]);
        args
    }

    fn stdin(&self) -> Option<Secret> {
        Some(self.passphrase.clone())
    }
}

/// `cryptsetup open <device> <name>`
#[derive(Debug, Clone)]
pub struct CryptsetupOpen {
    pub device: String,
    pub name: String,
    pub passphrase: Secret,
}

impl ToolArgs for CryptsetupOpen {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "open".to_string(),
            "--key-file".to_string(),
            "-".to_string(),
            self.device.clone(),
            self.name.clone(),
        ]
    }

    fn stdin(&self) -> Option<Secret> {
        Some(self.passphrase.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptsetupClose {
    pub name: String,
}

impl ToolArgs for CryptsetupClose {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["close".to_string(), self.name.clone()]
    }
}

/// `cryptsetup status <name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptsetupStatus {
    pub name: String,
}

impl ToolArgs for CryptsetupStatus {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["status".to_string(), self.name.clone()]
    }
}

/// Backing device from `cryptsetup status` output (the `device:` line)
pub fn parse_backing_device(status: &str) -> Option<String> {
    status.lines().find_map(|line| {
        line.trim()
            .strip_prefix("device:")
            .map(|device| device.trim().to_string())
            .filter(|device| !device.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_never_in_args() {
        let format = CryptsetupFormat {
            device: "/dev/nvme0n1p2".to_string(),
            passphrase: Secret::new("correct horse"),
            kdf: KeyDerivation::Argon2id,
        };
        let args = format.to_cli_args();
        assert!(!args.iter().any(|a| a.contains("correct horse")));
        assert_eq!(args.last().map(String::as_str), Some("/dev/nvme0n1p2"));
        assert_eq!(format.stdin().map(|s| s.expose().to_string()), Some("correct horse".to_string()));
    }

    #[test]
    fn test_pbkdf2_only_when_requested() {
        let mut format = CryptsetupFormat {
            device: "/dev/sda2".to_string(),
            passphrase: Secret::new("pw"),
            kdf: KeyDerivation::Argon2id,
        };
        assert!(!format.to_cli_args().contains(&"--pbkdf".to_string()));

        format.kdf = KeyDerivation::Pbkdf2;
        assert_eq!(
            format.to_cli_args().join(" "),
            "luksFormat --type luks2 --pbkdf pbkdf2 --batch-mode --key-file - /dev/sda2"
        );
    }

    #[test]
    fn test_backing_device_from_status() {
        let status = "\
/dev/mapper/cryptroot is active.
  type:    LUKS2
  cipher:  aes-xts-plain64
  keysize: 512 bits
  key location: keyring
  device:  /dev/nvme0n1p2
  sector size:  512
  mode:    read/write
";
        assert_eq!(parse_backing_device(status), Some("/dev/nvme0n1p2".to_string()));
        assert_eq!(parse_backing_device("/dev/mapper/cryptroot is inactive.\n"), None);
        assert_eq!(
            CryptsetupStatus { name: MAPPER_NAME.to_string() }.to_cli_args(),
            vec!["status", "cryptroot"]
        );
    }

    #[test]
    fn test_open_uses_fixed_mapper() {
        let open = CryptsetupOpen {
            device: "/dev/sda2".to_string(),
            name: MAPPER_NAME.to_string(),
            passphrase: Secret::new("pw"),
        };
        assert_eq!(open.to_cli_args(), vec!["open", "--key-file", "-", "/dev/sda2", "cryptroot"]);
        assert_eq!(mapped_device(), "/dev/mapper/cryptroot");
    }
}
