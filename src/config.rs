//! Installation configuration record
//!
//! The configuration is produced by an external loader and handed to the core
//! as JSON. Once loaded it is immutable; the pipeline only reads from it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::InstallError;
use crate::types::{BootMode, Bootloader, InputMethodEngine, Kernel, SwapMode};

/// Locale used when the configuration requests none, and always generated
pub const FALLBACK_LOCALE: &str = "en_US";

/// A credential that must never reach logs or error messages
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Only the sub-process pipe should ever see it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Target, identity and boot selections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSection {
    pub target_disk: String,
    pub hostname: String,
    pub username: String,
    pub root_password: Secret,
    pub user_password: Secret,
    pub encryption: bool,
    pub encryption_password: Secret,
    pub bootloader: Bootloader,
    pub boot_mode: BootMode,
    pub autologin: bool,
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            target_disk: String::new(),
            hostname: "blunux".to_string(),
            username: "user".to_string(),
            root_password: Secret::default(),
            user_password: Secret::default(),
            encryption: false,
            encryption_password: Secret::default(),
            bootloader: Bootloader::Grub,
            boot_mode: BootMode::Auto,
            autologin: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleSection {
    /// Locale names without encoding suffix, e.g. `ko_KR`
    pub languages: Vec<String>,
    /// Zoneinfo name, e.g. `Asia/Seoul`
    pub timezone: String,
    /// Console keymaps; the first one is written to `vconsole.conf`
    pub keyboards: Vec<String>,
}

impl Default for LocaleSection {
    fn default() -> Self {
        Self {
            languages: vec!["ko_KR".to_string()],
            timezone: "Asia/Seoul".to_string(),
            keyboards: vec!["us".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputMethodSection {
    pub enabled: bool,
    pub engine: InputMethodEngine,
}

impl Default for InputMethodSection {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: InputMethodEngine::Kime,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSection {
    pub swap: SwapMode,
}

/// Package selection, already mapped to package identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSelection {
    /// Install the KDE Plasma desktop set in the base pass
    pub desktop: bool,
    /// Optional packages installed after first boot by `install-packages.sh`
    pub optional: Vec<String>,
}

impl Default for PackageSelection {
    fn default() -> Self {
        Self {
            desktop: true,
            optional: Vec::new(),
        }
    }
}

/// Distribution branding copied into the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Branding {
    /// Label for the GRUB bootloader-id, ESP directory and firmware boot entry
    pub name: String,
    /// Host directory holding fastfetch config and logo
    pub fastfetch_dir: PathBuf,
    /// Host os-release copied over the target's
    pub os_release: PathBuf,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            name: "Blunux".to_string(),
            fastfetch_dir: PathBuf::from("/etc/fastfetch"),
            os_release: PathBuf::from("/etc/os-release"),
        }
    }
}

/// The full configuration record consumed by the installer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub install: InstallSection,
    pub locale: LocaleSection,
    pub kernel: Kernel,
    pub input_method: InputMethodSection,
    pub disk: DiskSection,
    pub packages: PackageSelection,
    pub branding: Branding,
}

impl Configuration {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate the values the installer core relies on
    pub fn validate(&self) -> crate::error::Result<()> {
        let disk = self.install.target_disk.trim();
        if disk.is_empty() {
            return Err(InstallError::config("Target disk must be specified"));
        }
        if !disk.starts_with("/dev/") {
            return Err(InstallError::config(format!(
                "Target disk must be a device path under /dev, got {disk:?}"
            )));
        }

        let hostname = self.install.hostname.trim();
        if hostname.is_empty() {
            return Err(InstallError::config("Hostname must be specified"));
        }
        if hostname.len() > 63
            || hostname.starts_with('-')
            || !hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(InstallError::config(format!(
                "Hostname {hostname:?} is not a valid host name"
            )));
        }

        let username = self.install.username.trim();
        if username.is_empty() {
            return Err(InstallError::config("Username must be specified"));
        }
        if username == "root" {
            return Err(InstallError::config("Username cannot be root"));
        }
        if username.len() > 32
            || !username.starts_with(|c: char| c.is_ascii_lowercase() || c == '_')
            || !username
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(InstallError::config(format!(
                "Username {username:?} is not a valid account name"
            )));
        }

        // chpasswd reads one "name:password" record per line
        for (label, secret) in [
            ("Root password", &self.install.root_password),
            ("User password", &self.install.user_password),
        ] {
            if secret.expose().contains('\n') {
                return Err(InstallError::config(format!(
                    "{label} cannot contain a newline"
                )));
            }
        }

        self.require_encryption_secret()?;

        if self.branding.name.trim().is_empty() {
            return Err(InstallError::config("Branding name must not be empty"));
        }

        Ok(())
    }

    /// Fails when encryption is on but no secret was provided.
    ///
    /// Called again right before formatting so the destructive step can never
    /// run without it.
    pub fn require_encryption_secret(&self) -> crate::error::Result<()> {
        if self.install.encryption && self.install.encryption_password.is_empty() {
            return Err(InstallError::config(
                "Encryption is enabled but no encryption password was provided",
            ));
        }
        Ok(())
    }

    /// Requested locales, or the fallback when none were requested
    pub fn languages(&self) -> Vec<String> {
        let languages: Vec<String> = self
            .locale
            .languages
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        if languages.is_empty() {
            vec![FALLBACK_LOCALE.to_string()]
        } else {
            languages
        }
    }

    /// Locale written to `LANG=`
    pub fn primary_language(&self) -> String {
        self.languages()
            .into_iter()
            .next()
            .unwrap_or_else(|| FALLBACK_LOCALE.to_string())
    }

    /// Returns true if any requested locale starts with the language code
    pub fn has_language(&self, code: &str) -> bool {
        self.languages().iter().any(|l| l.starts_with(code))
    }

    /// Returns true if a Chinese, Japanese or Korean locale is requested
    pub fn has_cjk_language(&self) -> bool {
        ["ko", "ja", "zh"].iter().any(|code| self.has_language(code))
    }

    /// Selected input method engine, if input methods are enabled
    pub fn input_method_engine(&self) -> Option<InputMethodEngine> {
        self.input_method
            .enabled
            .then_some(self.input_method.engine)
    }

    /// Home directory of the primary account, relative to the target root
    pub fn home_dir(&self) -> PathBuf {
        PathBuf::from("/home").join(self.install.username.trim())
    }
}

/// Core tunables that are not part of the configuration record
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOptions {
    /// Root of the target filesystem tree
    pub mount_point: PathBuf,
    /// Time given to udev after the partition table is re-read
    pub settle_delay: Duration,
    /// Firmware override; `Auto` defers to the configuration, then detection
    pub boot_mode: BootMode,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/mnt"),
            settle_delay: Duration::from_secs(2),
            boot_mode: BootMode::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> Configuration {
        let mut config = Configuration::default();
        config.install.target_disk = "/dev/sda".to_string();
        config.install.hostname = "blunux-test".to_string();
        config.install.username = "tester".to_string();
        config.install.root_password = Secret::new("rootpass");
        config.install.user_password = Secret::new("userpass");
        config
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert!(config.install.target_disk.is_empty());
        assert_eq!(config.install.hostname, "blunux");
        assert_eq!(config.install.bootloader, Bootloader::Grub);
        assert_eq!(config.kernel, Kernel::Linux);
        assert_eq!(config.disk.swap, SwapMode::File);
        assert_eq!(config.branding.name, "Blunux");
        assert!(config.packages.desktop);
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "***");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");

        let config = create_test_config();
        let debug = format!("{config:?}");
        assert!(!debug.contains("rootpass"));
        assert!(!debug.contains("userpass"));
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"{
                    "install": {"target_disk": "/dev/nvme0n1", "bootloader": "nmbl", "encryption": true,
                                "encryption_password": "s3cret"},
                    "kernel": "linux-zen",
                    "locale": {"languages": ["ja_JP", "en_US"]}
                }"#,
            )
            .unwrap();
        temp_file.flush().unwrap();

        let config = Configuration::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.install.target_disk, "/dev/nvme0n1");
        assert_eq!(config.install.bootloader, Bootloader::Nmbl);
        assert_eq!(config.install.encryption_password.expose(), "s3cret");
        assert_eq!(config.install.hostname, "blunux");
        assert_eq!(config.kernel, Kernel::LinuxZen);
        assert_eq!(config.locale.timezone, "Asia/Seoul");
        assert!(config.has_cjk_language());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let config = create_test_config();
        let temp_file = NamedTempFile::new().unwrap();
        config.save_to_file(temp_file.path()).unwrap();

        let loaded = Configuration::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(Configuration::load_from_file("/nonexistent/path.json").is_err());
    }

    #[test]
    fn test_load_wrong_enum_value_fails() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(br#"{"install": {"bootloader": "lilo"}}"#)
            .unwrap();
        temp_file.flush().unwrap();
        assert!(Configuration::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(create_test_config().validate().is_ok());
    }

    #[test]
    fn test_validation_requires_disk() {
        let mut config = create_test_config();
        config.install.target_disk = "  ".to_string();
        assert!(config.validate().is_err());

        config.install.target_disk = "sda".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_identity() {
        let mut config = create_test_config();
        config.install.hostname = "bad host".to_string();
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.install.username = "Root".to_string();
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.install.username = "root".to_string();
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.install.user_password = Secret::new("a\nb");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_encryption_secret() {
        let mut config = create_test_config();
        config.install.encryption = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("encryption password"));

        config.install.encryption_password = Secret::new("luks-pass");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_locale_list_falls_back() {
        let mut config = create_test_config();
        config.locale.languages = vec![];
        assert_eq!(config.languages(), vec!["en_US".to_string()]);
        assert_eq!(config.primary_language(), "en_US");
        assert!(!config.has_cjk_language());
    }

    #[test]
    fn test_input_method_engine_disabled() {
        let mut config = create_test_config();
        assert_eq!(config.input_method_engine(), Some(InputMethodEngine::Kime));
        config.input_method.enabled = false;
        assert_eq!(config.input_method_engine(), None);
    }

    #[test]
    fn test_home_dir() {
        let config = create_test_config();
        assert_eq!(config.home_dir(), PathBuf::from("/home/tester"));
    }
}
